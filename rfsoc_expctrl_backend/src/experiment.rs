//! # Running experiments on the board
//!
//! [`Experiment`] extends the compiler's session builder with hardware access: it
//! shares the whole event and channel API through
//! [`rfsoc_compiler_backend::BaseExperiment`] (generated by
//! [`rfsoc_compiler_backend::impl_exp_boilerplate`]) and adds upload and
//! acquisition on a [`Board`].
//!
//! A run is strictly sequential: compile, upload, start, drain the stream, decode.
//! Every run recompiles and re-uploads everything, so nothing from an earlier run
//! is assumed to be present on the board.
//!
//! ```
//! use rfsoc_compiler_backend::{BaseExperiment, Waveform};
//! use rfsoc_expctrl_backend::*;
//!
//! let mut exp = Experiment::new();
//! exp.dac_pulse("drive", 1, 0., 1e-6, None, Waveform::new_sine(10e6, Some(0.5), None), 0., false)
//!     .unwrap();
//! let mut board = Board::new(MockTransport::new());
//! let result = exp.run(&mut board, 1, None, &ReaderSettings::default()).unwrap();
//! assert!(result.channels.is_empty());
//! assert_eq!(board.transport().written().last().unwrap(), "SEQ:START");
//! ```

use indexmap::IndexMap;

use rfsoc_compiler_backend::*;

use crate::board::Board;
use crate::config::{CalibrationConfig, Config};
use crate::error::Result;
use crate::reader::{AcquisitionResult, Reader, ReaderSettings};
use crate::transport::Transport;

/// Session builder that can also drive the board.
#[cfg_attr(feature = "python", pyo3::pyclass)]
#[derive(Clone, Debug)]
pub struct Experiment {
    events: IndexMap<String, Event>,
    dacs: Vec<DacChannel>,
    adcs: Vec<AdcChannel>,
    sync_required: bool,
}

impl_exp_boilerplate!(Experiment);

impl Default for Experiment {
    fn default() -> Self {
        Self::new()
    }
}

impl Experiment {
    pub fn new() -> Self {
        Self {
            events: IndexMap::new(),
            dacs: default_dacs(),
            adcs: default_adcs(),
            sync_required: false,
        }
    }

    /// An empty session with the channel settings and sync requirement of `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut exp = Self::new();
        exp.apply_calibration(&config.calibration)?;
        exp.set_sync_required(config.sync.required);
        Ok(exp)
    }

    pub fn apply_calibration(&mut self, calibration: &CalibrationConfig) -> Result<()> {
        for (&channel, &coeff) in &calibration.dac {
            self.set_calibration(channel, coeff)?;
        }
        for (&channel, &mhz) in &calibration.mixer_mhz {
            self.set_mixer(channel, Some(mhz))?;
        }
        for (&channel, &factor) in &calibration.decimation {
            self.set_decimation(channel, factor)?;
        }
        Ok(())
    }

    /// Sends `compiled` to the board together with this session's ADC settings.
    pub fn upload<T: Transport>(&self, board: &mut Board<T>, compiled: &CompiledExperiment) -> Result<()> {
        board.upload(compiled, self.adcs())?;
        Ok(())
    }

    /// Compiles, uploads and acquires `n_rep` repetitions.
    ///
    /// Compilation errors surface before anything is sent to the board.
    pub fn run<T: Transport>(
        &mut self,
        board: &mut Board<T>,
        n_rep: u32,
        freq_sync: Option<f64>,
        settings: &ReaderSettings,
    ) -> Result<AcquisitionResult> {
        let compiled = self.compile(n_rep, freq_sync)?;
        self.upload(board, &compiled)?;
        let result = Reader::new(board, &compiled.plan, settings).acquire()?;
        Ok(result)
    }
}
