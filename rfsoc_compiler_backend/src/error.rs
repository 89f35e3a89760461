//! Errors surfaced while building and compiling an experiment.
//!
//! Every variant is raised before anything reaches the board: a failed compile
//! leaves the session untouched apart from the events the caller registered.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("channel {0} is out of range, expected 1..=8")]
    InvalidChannel(u8),

    #[error("event '{label}' has non-positive duration {duration} [s]")]
    NonPositiveDuration { label: String, duration: f64 },

    #[error("event '{label}' has non-finite start {start} [s]")]
    NonFiniteStart { label: String, start: f64 },

    #[error("event '{label}': duration {duration} [s] is shorter than one sample")]
    SubSampleDuration { label: String, duration: f64 },

    #[error("event '{label}' resolves to negative absolute start {start} [s]")]
    NegativeStart { label: String, start: f64 },

    #[error("event label '{0}' is already registered")]
    DuplicateLabel(String),

    #[error("event label '{0}' is not a valid identifier")]
    InvalidLabel(String),

    #[error("no event registered under '{0}'")]
    UnknownEvent(String),

    #[error("event #{index} references parent #{parent}, which does not exist")]
    UnknownParent { index: usize, parent: usize },

    #[error("parent chain of event '{0}' is cyclic")]
    CyclicHierarchy(String),

    #[error("event '{label}': frequency {freq} [Hz] must lie in [0, {nyquist}) [Hz]")]
    FrequencyOutOfRange { label: String, freq: f64, nyquist: f64 },

    #[error("event '{label}': amplitude budget {budget} exceeds the limit {limit} of full scale")]
    AmplitudeBudget { label: String, budget: f64, limit: f64 },

    #[error("event '{label}': phase {phase} [deg] must lie in [0, 360)")]
    PhaseOutOfRange { label: String, phase: f64 },

    #[error("event '{label}': {samples} samples exceed the {limit}-sample limit for this pulse kind")]
    PulseTooLong { label: String, samples: usize, limit: usize },

    #[error("events '{first}' and '{second}' overlap in time on channel {channel}")]
    OverlappingPulses { channel: u8, first: String, second: String },

    #[error("DAC channel {channel} waveform memory exhausted: need words {start}..{end}, limit {limit}")]
    MemoryExhausted { channel: u8, start: usize, end: usize, limit: usize },

    #[error("ADC channel {0} mixes Raw and Accumulated acquisitions in one program")]
    MixedAcquisitionModes(u8),

    #[error("repetition count must be at least 1")]
    InvalidRepetitions,

    #[error("synchronization is required but no freq_sync was given")]
    MissingFreqSync,

    #[error("freq_sync {0} [Hz] does not evenly divide the sequencer clock")]
    InvalidFreqSync(f64),

    #[error("invalid channel setting: {0}")]
    InvalidSetting(String),
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;
