//! Hardware-free compiler for the FPGA pulse sequencer.
//!
//! Build an [`Experiment`] out of DAC and ADC pulse events, then
//! [`compile`](BaseExperiment::compile) it into
//! - a [`CompiledProgram`], the sequencer opcode stream,
//! - one [`WaveformTable`] per DAC pulse, ready for upload,
//! - an [`AcquisitionPlan`] describing the data the board will stream back.
//!
//! Uploading and acquisition live in the `rfsoc_expctrl_backend` crate.

pub mod acquisition;
pub mod channel;
pub mod error;
pub mod event;
pub mod experiment;
pub mod sequencer;
pub mod timing;
pub mod utils;
pub mod waveform;

pub use acquisition::*;
pub use channel::*;
pub use error::*;
pub use event::*;
pub use experiment::*;
pub use sequencer::*;
pub use timing::*;
pub use utils::*;
pub use waveform::*;
