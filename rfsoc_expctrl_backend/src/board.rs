//! Command layer of the board: configuration, uploads and run control.
//!
//! [`Board`] owns a [`Transport`] and renders every board command. It keeps no
//! state of its own; the session decides what to send and in which order.

use std::collections::BTreeSet;
use std::fmt;

use rfsoc_compiler_backend::*;

use crate::error::TransportError;
use crate::transport::{PollReply, Transport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Ascii,
    Bin,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OutputFormat::Ascii => write!(f, "ASCII"),
            OutputFormat::Bin => write!(f, "BIN"),
        }
    }
}

pub struct Board<T: Transport> {
    transport: T,
}

impl<T: Transport> Board<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn send(&mut self, cmd: &str) -> Result<(), TransportError> {
        self.transport.write_line(cmd)
    }

    pub fn set_output_format(&mut self, format: OutputFormat) -> Result<(), TransportError> {
        self.send(&format!("OUTPUT:FORMAT {}", format))
    }

    pub fn enable_adc(&mut self, channel: u8, enable: bool) -> Result<(), TransportError> {
        self.send(&format!("ADC:ADC{} {}", channel, enable as u8))
    }

    pub fn set_mixer(&mut self, channel: u8, mixer_mhz: f64) -> Result<(), TransportError> {
        self.send(&format!("ADC:ADC{}:MIXER {}", channel, mixer_mhz))
    }

    pub fn set_decimation(&mut self, tile: u8, factor: u32) -> Result<(), TransportError> {
        self.send(&format!("ADC:TILE{}:DECFACTOR {}", tile, factor))
    }

    pub fn clear_dac(&mut self, channel: u8) -> Result<(), TransportError> {
        self.send(&format!("DAC:DATA:CH{}:CLEAR", channel))
    }

    pub fn upload_waveform(&mut self, table: &WaveformTable) -> Result<(), TransportError> {
        log::debug!(
            "uploading '{}' to DAC {} at word {} ({} words{})",
            table.label,
            table.channel,
            table.address,
            table.n_words(),
            if table.continuous_wave { ", CW" } else { "" }
        );
        self.send(&table.to_command())
    }

    pub fn upload_program(&mut self, program: &CompiledProgram) -> Result<(), TransportError> {
        log::debug!("uploading program of {} opcodes", program.ops.len());
        self.send(&program.to_command())
    }

    /// Enables exactly the ADC channels `plan` reads and applies their mixer and
    /// tile decimation settings.
    pub fn configure_adcs(
        &mut self,
        adcs: &[AdcChannel],
        plan: &AcquisitionPlan,
    ) -> Result<(), TransportError> {
        let mut tiles = BTreeSet::new();
        for adc in adcs {
            let enabled = plan.channels.contains_key(&adc.id());
            self.enable_adc(adc.id(), enabled)?;
            if !enabled {
                continue;
            }
            if let Some(mhz) = adc.mixer_mhz() {
                self.set_mixer(adc.id(), mhz)?;
            }
            if tiles.insert(tile_of(adc.id())) {
                self.set_decimation(tile_of(adc.id()), adc.decimation())?;
            }
        }
        Ok(())
    }

    /// Sends a whole compiled experiment: output format, ADC configuration, cleared
    /// and refilled waveform memory of every DAC channel in use, then the program.
    pub fn upload(
        &mut self,
        compiled: &CompiledExperiment,
        adcs: &[AdcChannel],
    ) -> Result<(), TransportError> {
        let mut timer = TickTimer::new();
        self.set_output_format(OutputFormat::Bin)?;
        self.configure_adcs(adcs, &compiled.plan)?;
        for channel in compiled.dac_channels() {
            self.clear_dac(channel)?;
            for table in compiled.waveforms.iter().filter(|t| t.channel == channel) {
                self.upload_waveform(table)?;
            }
        }
        self.upload_program(&compiled.program)?;
        timer.tick_log("upload");
        log::info!(
            "uploaded {} waveform tables and {} opcodes",
            compiled.waveforms.len(),
            compiled.program.ops.len()
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransportError> {
        self.send("SEQ:START")
    }

    pub fn stop(&mut self) -> Result<(), TransportError> {
        self.send("SEQ:STOP")
    }

    pub fn poll(&mut self) -> Result<PollReply, TransportError> {
        self.transport.poll_data()
    }
}
