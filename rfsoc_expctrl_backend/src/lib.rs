//! Hardware side of the RFSoC pulse sequencer: uploads compiled experiments to the
//! board over its TCP command port and reads the acquisition stream back.
//!
//! Modules, bottom-up:
//! - [`transport`]: line/block command channel ([`TcpTransport`], [`MockTransport`]);
//! - [`board`]: board commands and the upload sequence;
//! - [`frame`]: pure decoding of the streamed frames;
//! - [`reader`]: the acquisition state machine with bounded recovery;
//! - [`experiment`]: the session builder extended with `upload` and `run`;
//! - [`worker`]: runs on a dedicated thread;
//! - [`config`]: JSON and environment configuration.

pub mod board;
pub mod config;
pub mod error;
pub mod experiment;
pub mod frame;
#[cfg(feature = "python")]
pub mod python;
pub mod reader;
pub mod transport;
pub mod utils;
pub mod worker;
pub mod worker_cmd_chan;

pub use crate::board::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::experiment::Experiment;
pub use crate::frame::*;
pub use crate::reader::*;
pub use crate::transport::*;
pub use crate::utils::*;
pub use crate::worker::*;
pub use crate::worker_cmd_chan::*;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn rfsoc_expctrl_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<Experiment>()?;
    Ok(())
}
