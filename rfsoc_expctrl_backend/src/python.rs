//! Python bindings of [`Experiment`] (cargo feature `python`).
//!
//! ```python
//! from rfsoc_expctrl_backend import Experiment
//!
//! exp = Experiment()
//! exp.add_dac_pulse("drive", 1, 0.0, 1e-6, 10e6, amplitude=0.5)
//! exp.add_adc_pulse("readout", 2, 0.0, 1e-6, parent="drive", accumulated=True)
//! print(exp.compile(100))
//! data = exp.run("192.168.1.10", 5001, 100)
//! i, q = data[2]
//! ```

use std::time::Duration;

use numpy::IntoPyArray;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use rfsoc_compiler_backend::{AcqMode, BaseExperiment, Waveform};

use crate::board::Board;
use crate::error::Error;
use crate::experiment::Experiment;
use crate::reader::{ChannelData, ReaderSettings};
use crate::transport::TcpTransport;

impl From<Error> for PyErr {
    fn from(err: Error) -> PyErr {
        PyRuntimeError::new_err(err.to_string())
    }
}

fn py_err<E: Into<Error>>(err: E) -> PyErr {
    err.into().into()
}

fn channel_data_to_py(py: Python<'_>, data: ChannelData) -> PyObject {
    match data {
        ChannelData::Accumulated { i, q } => (i.into_pyarray(py), q.into_pyarray(py)).to_object(py),
        ChannelData::Raw { pulses } => {
            PyList::new(py, pulses.into_iter().map(|p| p.into_pyarray(py))).to_object(py)
        }
        ChannelData::Continuous { i, q: Some(q) } => {
            (i.into_pyarray(py), q.into_pyarray(py)).to_object(py)
        }
        ChannelData::Continuous { i, q: None } => i.into_pyarray(py).to_object(py),
    }
}

#[pymethods]
impl Experiment {
    #[new]
    fn py_new() -> Self {
        Experiment::new()
    }

    /// Adds a single-tone DAC pulse; `phase` in degrees, amplitudes as fractions
    /// of full scale.
    #[pyo3(signature = (label, channel, relative_start, duration, freq, amplitude=1.0, phase=0.0, dc_offset=0.0, parent=None, continuous_wave=false))]
    #[allow(clippy::too_many_arguments)]
    fn add_dac_pulse(
        &mut self,
        label: &str,
        channel: u8,
        relative_start: f64,
        duration: f64,
        freq: f64,
        amplitude: f64,
        phase: f64,
        dc_offset: f64,
        parent: Option<&str>,
        continuous_wave: bool,
    ) -> PyResult<()> {
        let waveform = Waveform::new_sine(freq, Some(amplitude), Some(phase));
        self.dac_pulse(
            label,
            channel,
            relative_start,
            duration,
            parent,
            waveform,
            dc_offset,
            continuous_wave,
        )
        .map_err(py_err)?;
        Ok(())
    }

    /// Adds a two-tone DAC pulse; each tone is `(freq, amplitude, phase)`.
    #[pyo3(signature = (label, channel, relative_start, duration, first, second, dc_offset=0.0, parent=None, continuous_wave=false))]
    #[allow(clippy::too_many_arguments)]
    fn add_dual_dac_pulse(
        &mut self,
        label: &str,
        channel: u8,
        relative_start: f64,
        duration: f64,
        first: (f64, f64, f64),
        second: (f64, f64, f64),
        dc_offset: f64,
        parent: Option<&str>,
        continuous_wave: bool,
    ) -> PyResult<()> {
        let waveform = Waveform::new_dual_sine(first, second);
        self.dac_pulse(
            label,
            channel,
            relative_start,
            duration,
            parent,
            waveform,
            dc_offset,
            continuous_wave,
        )
        .map_err(py_err)?;
        Ok(())
    }

    /// Adds an ADC acquisition window. `accumulated` and `continuous` are exclusive;
    /// with neither the window is streamed raw.
    #[pyo3(signature = (label, channel, relative_start, duration, parent=None, accumulated=false, continuous=false))]
    #[allow(clippy::too_many_arguments)]
    fn add_adc_pulse(
        &mut self,
        label: &str,
        channel: u8,
        relative_start: f64,
        duration: f64,
        parent: Option<&str>,
        accumulated: bool,
        continuous: bool,
    ) -> PyResult<()> {
        let mode = match (accumulated, continuous) {
            (false, false) => AcqMode::Raw,
            (true, false) => AcqMode::Accumulated,
            (false, true) => AcqMode::Continuous,
            (true, true) => {
                return Err(PyValueError::new_err(
                    "an ADC pulse cannot be both accumulated and continuous",
                ))
            }
        };
        self.adc_pulse(label, channel, relative_start, duration, parent, mode)
            .map_err(py_err)?;
        Ok(())
    }

    #[pyo3(name = "set_parent", signature = (label, parent=None))]
    fn py_set_parent(&mut self, label: &str, parent: Option<&str>) -> PyResult<()> {
        self.set_parent(label, parent).map_err(py_err)
    }

    #[pyo3(name = "clear_edit_cache")]
    fn py_clear_edit_cache(&mut self) {
        self.clear_edit_cache();
    }

    #[pyo3(name = "set_calibration")]
    fn py_set_calibration(&mut self, channel: u8, calibration: f64) -> PyResult<()> {
        self.set_calibration(channel, calibration).map_err(py_err)
    }

    #[pyo3(name = "set_mixer", signature = (channel, mixer_mhz=None))]
    fn py_set_mixer(&mut self, channel: u8, mixer_mhz: Option<f64>) -> PyResult<()> {
        self.set_mixer(channel, mixer_mhz).map_err(py_err)
    }

    #[pyo3(name = "set_decimation")]
    fn py_set_decimation(&mut self, channel: u8, factor: u32) -> PyResult<()> {
        self.set_decimation(channel, factor).map_err(py_err)
    }

    #[pyo3(name = "set_sync_required")]
    fn py_set_sync_required(&mut self, required: bool) {
        self.set_sync_required(required);
    }

    /// Compiles and returns the `SEQ` command.
    #[pyo3(name = "compile", signature = (n_rep, freq_sync=None))]
    fn py_compile(&mut self, n_rep: u32, freq_sync: Option<f64>) -> PyResult<String> {
        let compiled = self.compile(n_rep, freq_sync).map_err(py_err)?;
        Ok(compiled.program.to_command())
    }

    /// Runs on the board at `host:port` and returns `{channel: data}`.
    ///
    /// Accumulated channels give an `(i, q)` pair of `(n_rep, pulses)` arrays, raw
    /// channels a list of averaged traces, one per pulse. Continuous channels give
    /// one array, or an `(i, q)` pair with the mixer on.
    #[pyo3(name = "run", signature = (host, port, n_rep, freq_sync=None, timeout_ms=5000, max_retries=3))]
    #[allow(clippy::too_many_arguments)]
    fn py_run(
        &mut self,
        py: Python<'_>,
        host: &str,
        port: u16,
        n_rep: u32,
        freq_sync: Option<f64>,
        timeout_ms: u64,
        max_retries: u32,
    ) -> PyResult<PyObject> {
        let settings = ReaderSettings {
            max_retries,
            ..ReaderSettings::default()
        };
        let result = py.allow_threads(|| -> Result<_, Error> {
            let transport = TcpTransport::connect(host, port, Duration::from_millis(timeout_ms))?;
            let mut board = Board::new(transport);
            self.run(&mut board, n_rep, freq_sync, &settings)
        })?;
        let dict = PyDict::new(py);
        for (channel, data) in result.channels {
            dict.set_item(channel, channel_data_to_py(py, data))?;
        }
        Ok(dict.to_object(py))
    }

    fn __repr__(&self) -> String {
        format!(
            "Experiment({} events, sync_required={})",
            self.events().len(),
            self.sync_required()
        )
    }
}
