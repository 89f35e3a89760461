//! Provides definitions for the pulse events a sequence is built from.
//!
//! ## Main Structures and Enumerations:
//!
//! - [`Event`]: one output (DAC) or input (ADC) pulse on a channel, placed in time
//!   relative to an optional parent event. Parents are referenced by [`EventId`], an
//!   index into the owning experiment's event collection, never by reference.
//!
//! - [`EventKind`]: the DAC/ADC discriminant. Compilation and synthesis branch on this
//!   enum rather than on the concrete type of the event.
//!
//! - [`Waveform`]: single or dual sinusoid carried by a [`DacPulse`]. Like any
//!   instruction it can evaluate itself in-place over an array of sample times.
//!
//! - [`AcqMode`]: raw sample streaming or on-board accumulation for an [`AdcPulse`].
//!
//! ## Units
//!
//! Times and durations are in seconds, frequencies in Hz, phases in degrees.
//! Amplitudes and DC offsets are fractions of the DAC full scale.

use std::f64::consts::PI;
use std::fmt;

use crate::error::{CompileError, Result};
use crate::timing::SAMPLE_RATE;

/// Number of DAC channels and of ADC channels on the board.
pub const NUM_CHANNELS: u8 = 8;

/// Checks that a 1-based channel id addresses a physical channel.
pub fn check_channel(channel: u8) -> Result<()> {
    if (1..=NUM_CHANNELS).contains(&channel) {
        Ok(())
    } else {
        Err(CompileError::InvalidChannel(channel))
    }
}

/// Index of an event inside the experiment's ordered event collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub usize);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One sinusoidal component: frequency [Hz], amplitude [fraction of full scale],
/// phase [deg].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tone {
    pub freq: f64,
    pub amplitude: f64,
    pub phase: f64,
}

/// Signal played by a DAC pulse.
///
/// ## Implemented waveform types and their fields:
/// 1. `Waveform::Sine`: one [`Tone`]
/// 2. `Waveform::DualSine`: two [`Tone`]s summed
///
/// The DC offset and the channel scale are applied by the synthesizer, see
/// [`crate::waveform::synthesize`].
#[derive(Clone, Debug, PartialEq)]
pub enum Waveform {
    Sine(Tone),
    DualSine(Tone, Tone),
}

impl Waveform {
    /// Constructs a single-tone waveform. `amplitude` defaults to `1.0` and
    /// `phase` to `0.0` when not given.
    ///
    /// ```
    /// use rfsoc_compiler_backend::event::*;
    ///
    /// let wf = Waveform::new_sine(4e6, None, Some(90.));
    /// assert_eq!(wf.tones()[0].amplitude, 1.0);
    /// assert_eq!(wf.tones()[0].phase, 90.0);
    /// ```
    pub fn new_sine(freq: f64, amplitude: Option<f64>, phase: Option<f64>) -> Self {
        Waveform::Sine(Tone {
            freq,
            amplitude: amplitude.unwrap_or(1.0),
            phase: phase.unwrap_or(0.0),
        })
    }

    /// Constructs a dual-tone waveform from two `(freq, amplitude, phase)` triples.
    pub fn new_dual_sine(first: (f64, f64, f64), second: (f64, f64, f64)) -> Self {
        let tone = |(freq, amplitude, phase)| Tone {
            freq,
            amplitude,
            phase,
        };
        Waveform::DualSine(tone(first), tone(second))
    }

    pub fn tones(&self) -> Vec<&Tone> {
        match self {
            Waveform::Sine(tone) => vec![tone],
            Waveform::DualSine(first, second) => vec![first, second],
        }
    }

    /// Sum of the tone amplitudes.
    pub fn amplitude_sum(&self) -> f64 {
        self.tones().iter().map(|tone| tone.amplitude.abs()).sum()
    }

    /// Evaluates the waveform and replaces each time value in `t_arr` with the
    /// signal value at that time, in units of full scale.
    ///
    /// ```
    /// use rfsoc_compiler_backend::event::*;
    ///
    /// let mut t_arr = ndarray::Array1::from(vec![0.0, 0.25]);
    /// Waveform::new_sine(1.0, Some(0.5), None).eval_inplace(&mut t_arr.view_mut());
    /// assert!(t_arr[0].abs() < 1e-12);
    /// assert!((t_arr[1] - 0.5).abs() < 1e-12);
    /// ```
    pub fn eval_inplace(&self, t_arr: &mut ndarray::ArrayViewMut1<f64>) {
        let tones: Vec<(f64, f64, f64)> = self
            .tones()
            .iter()
            .map(|tone| (2.0 * PI * tone.freq, tone.amplitude, tone.phase.to_radians()))
            .collect();
        t_arr.map_inplace(|t| {
            let time = *t;
            *t = tones
                .iter()
                .map(|(omega, amplitude, phase)| amplitude * (omega * time + phase).sin())
                .sum();
        });
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tone_string = self
            .tones()
            .iter()
            .map(|t| format!("{{freq: {}, amplitude: {}, phase: {}}}", t.freq, t.amplitude, t.phase))
            .collect::<Vec<String>>()
            .join(", ");
        match self {
            Waveform::Sine(_) => write!(f, "SINE[{}]", tone_string),
            Waveform::DualSine(_, _) => write!(f, "DUAL_SINE[{}]", tone_string),
        }
    }
}

/// Acquisition mode of an ADC pulse. Fixed per channel for one compiled program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcqMode {
    Raw,
    Accumulated,
    /// Streams every decimated sample as `NpCont` points; with the mixer on the
    /// points interleave I and Q.
    Continuous,
}

impl AcqMode {
    /// 4-bit code packed into the sequencer mode word.
    pub fn nibble(&self) -> u32 {
        match self {
            AcqMode::Raw => 0b0000,
            AcqMode::Accumulated => 0b0001,
            AcqMode::Continuous => 0b0010,
        }
    }
}

impl fmt::Display for AcqMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                AcqMode::Raw => "RAW",
                AcqMode::Accumulated => "ACCUMULATED",
                AcqMode::Continuous => "CONTINUOUS",
            }
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DacPulse {
    pub waveform: Waveform,
    pub dc_offset: f64,
    pub continuous_wave: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdcPulse {
    pub acq_mode: AcqMode,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    Dac(DacPulse),
    Adc(AdcPulse),
}

/// A pulse on one channel, placed `relative_start` seconds after the end of its
/// parent (or after t=0 when it has none).
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub label: String,
    pub channel: u8,
    pub relative_start: f64,
    pub duration: f64,
    pub parent: Option<EventId>,
    pub kind: EventKind,
}

impl Event {
    /// Constructs an `Event`, checking the channel id, that the start is finite and
    /// that the duration spans at least one sample.
    pub fn new(
        label: &str,
        channel: u8,
        relative_start: f64,
        duration: f64,
        parent: Option<EventId>,
        kind: EventKind,
    ) -> Result<Self> {
        check_channel(channel)?;
        if !(duration > 0.0) || !duration.is_finite() {
            return Err(CompileError::NonPositiveDuration {
                label: label.to_string(),
                duration,
            });
        }
        if (duration * SAMPLE_RATE).round() < 1.0 {
            return Err(CompileError::SubSampleDuration {
                label: label.to_string(),
                duration,
            });
        }
        if !relative_start.is_finite() {
            return Err(CompileError::NonFiniteStart {
                label: label.to_string(),
                start: relative_start,
            });
        }
        Ok(Event {
            label: label.to_string(),
            channel,
            relative_start,
            duration,
            parent,
            kind,
        })
    }

    pub fn is_dac(&self) -> bool {
        matches!(self.kind, EventKind::Dac(_))
    }

    /// Number of 0.5 ns sample ticks spanned by the pulse.
    pub fn samples(&self) -> usize {
        (self.duration * SAMPLE_RATE).round() as usize
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            EventKind::Dac(dac) => format!(
                "DAC {} dc={}{}",
                dac.waveform,
                dac.dc_offset,
                if dac.continuous_wave { " CW" } else { "" }
            ),
            EventKind::Adc(adc) => format!("ADC {}", adc.acq_mode),
        };
        write!(
            f,
            "Event({}, ch{}, +{}s, {}s, {})",
            self.label, self.channel, self.relative_start, self.duration, kind
        )
    }
}
