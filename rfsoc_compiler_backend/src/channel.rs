//! Per-channel board state owned by an experiment session.
//!
//! Both channel flavours implement [`BaseChannel`], which exposes field accessors
//! (immutable ones and `_`-suffixed mutable ones) and builds the shared behaviour on
//! top of them.
//!
//! - [`DacChannel`] tracks the calibration coefficient and the waveform-memory
//!   allocator. Pulse tables are appended at the write pointer; continuous-wave
//!   tables sit at the top of memory so they keep looping until cleared or
//!   overwritten.
//! - [`AdcChannel`] tracks the enable flag, the mixer frequency, the decimation
//!   factor and the acquisition mode fixed for one compiled program.
//!
//! ADC decimation is a tile property: channels `2t+1` and `2t+2` share tile `t`,
//! see [`tile_of`] and [`tile_sibling`].

use crate::error::{CompileError, Result};
use crate::event::{check_channel, AcqMode};

/// Words of waveform memory per DAC channel. One word holds 8 samples.
pub const WAVEFORM_MEMORY_WORDS: usize = 16384;
/// Nominal 14-bit DAC full scale.
pub const DAC_FULL_SCALE: f64 = 8192.0;
/// Decimation factors supported by the ADC tiles.
pub const DECIMATION_FACTORS: [u32; 13] = [1, 2, 3, 4, 5, 6, 8, 10, 12, 16, 20, 24, 40];
/// Mixer frequencies must stay below the ADC Nyquist frequency [MHz].
pub const MIXER_LIMIT_MHZ: f64 = 1000.0;

/// ADC tile hosting a 1-based channel.
pub fn tile_of(channel: u8) -> u8 {
    (channel - 1) / 2
}

/// The other channel on the same ADC tile.
pub fn tile_sibling(channel: u8) -> u8 {
    if channel % 2 == 1 {
        channel + 1
    } else {
        channel - 1
    }
}

pub trait BaseChannel {
    // Field methods
    fn id(&self) -> u8;
    fn prefix(&self) -> &'static str;
    fn is_active(&self) -> bool;
    // Mutable field references
    fn active_(&mut self) -> &mut bool;

    /// Board-side name, e.g. `DAC3` or `ADC1`.
    fn physical_name(&self) -> String {
        format!("{}{}", self.prefix(), self.id())
    }

    fn mark_active(&mut self) {
        *self.active_() = true;
    }

    /// Resets per-compile state. Configuration survives.
    fn clear_compile_cache(&mut self);
}

#[derive(Clone, Debug, PartialEq)]
pub struct DacChannel {
    id: u8,
    calibration: f64,
    write_ptr: usize,
    cw_floor: usize,
    active: bool,
}

impl BaseChannel for DacChannel {
    fn id(&self) -> u8 {
        self.id
    }
    fn prefix(&self) -> &'static str {
        "DAC"
    }
    fn is_active(&self) -> bool {
        self.active
    }
    fn active_(&mut self) -> &mut bool {
        &mut self.active
    }
    fn clear_compile_cache(&mut self) {
        self.active = false;
        self.clear_memory();
    }
}

impl DacChannel {
    pub fn new(id: u8) -> Result<Self> {
        check_channel(id)?;
        Ok(Self {
            id,
            calibration: 1.0,
            write_ptr: 0,
            cw_floor: WAVEFORM_MEMORY_WORDS,
            active: false,
        })
    }

    pub fn calibration(&self) -> f64 {
        self.calibration
    }

    /// Sets the calibration coefficient, which must lie in (0, 1].
    pub fn set_calibration(&mut self, calibration: f64) -> Result<()> {
        if !(calibration > 0.0 && calibration <= 1.0) {
            return Err(CompileError::InvalidSetting(format!(
                "calibration {} of {} must lie in (0, 1]",
                calibration,
                self.physical_name()
            )));
        }
        self.calibration = calibration;
        Ok(())
    }

    /// Sample value corresponding to full-scale amplitude `1.0`.
    pub fn scale(&self) -> f64 {
        DAC_FULL_SCALE * self.calibration
    }

    /// Next free word address for pulse tables.
    pub fn next_free(&self) -> usize {
        self.write_ptr
    }

    /// Reserves `n_words` for a pulse table at the write pointer and advances it.
    pub fn allocate(&mut self, n_words: usize) -> Result<usize> {
        let start = self.write_ptr;
        let end = start + n_words;
        if end > self.cw_floor {
            return Err(CompileError::MemoryExhausted {
                channel: self.id,
                start,
                end,
                limit: self.cw_floor,
            });
        }
        self.write_ptr = end;
        Ok(start)
    }

    /// Reserves the top `n_words` of memory for a continuous-wave table.
    ///
    /// A second CW table overwrites the first one from the top down.
    pub fn allocate_cw(&mut self, n_words: usize) -> Result<usize> {
        if n_words > WAVEFORM_MEMORY_WORDS || WAVEFORM_MEMORY_WORDS - n_words < self.write_ptr {
            return Err(CompileError::MemoryExhausted {
                channel: self.id,
                start: WAVEFORM_MEMORY_WORDS.saturating_sub(n_words),
                end: WAVEFORM_MEMORY_WORDS,
                limit: WAVEFORM_MEMORY_WORDS,
            });
        }
        let address = WAVEFORM_MEMORY_WORDS - n_words;
        self.cw_floor = self.cw_floor.min(address);
        Ok(address)
    }

    pub fn clear_memory(&mut self) {
        self.write_ptr = 0;
        self.cw_floor = WAVEFORM_MEMORY_WORDS;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AdcChannel {
    id: u8,
    mixer_mhz: Option<f64>,
    decimation: u32,
    acq_mode: Option<AcqMode>,
    active: bool,
}

impl BaseChannel for AdcChannel {
    fn id(&self) -> u8 {
        self.id
    }
    fn prefix(&self) -> &'static str {
        "ADC"
    }
    fn is_active(&self) -> bool {
        self.active
    }
    fn active_(&mut self) -> &mut bool {
        &mut self.active
    }
    fn clear_compile_cache(&mut self) {
        self.active = false;
        self.acq_mode = None;
    }
}

impl AdcChannel {
    pub fn new(id: u8) -> Result<Self> {
        check_channel(id)?;
        Ok(Self {
            id,
            mixer_mhz: None,
            decimation: 1,
            acq_mode: None,
            active: false,
        })
    }

    pub fn mixer_mhz(&self) -> Option<f64> {
        self.mixer_mhz
    }

    /// Sets (or with `None`, bypasses) the down-conversion mixer.
    pub fn set_mixer(&mut self, mixer_mhz: Option<f64>) -> Result<()> {
        if let Some(freq) = mixer_mhz {
            if !freq.is_finite() || freq.abs() >= MIXER_LIMIT_MHZ {
                return Err(CompileError::InvalidSetting(format!(
                    "mixer frequency {} MHz of {} must lie within +-{} MHz",
                    freq,
                    self.physical_name(),
                    MIXER_LIMIT_MHZ
                )));
            }
        }
        self.mixer_mhz = mixer_mhz;
        Ok(())
    }

    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    /// Sets this channel's decimation factor only. Use the experiment-level setter
    /// to keep the tile sibling consistent.
    pub fn set_decimation(&mut self, factor: u32) -> Result<()> {
        if !DECIMATION_FACTORS.contains(&factor) {
            return Err(CompileError::InvalidSetting(format!(
                "decimation factor {} is not one of {:?}",
                factor, DECIMATION_FACTORS
            )));
        }
        self.decimation = factor;
        Ok(())
    }

    pub fn acq_mode(&self) -> Option<AcqMode> {
        self.acq_mode
    }

    /// Fixes the acquisition mode for the program being compiled. A channel may
    /// only carry one mode per program.
    pub fn claim_mode(&mut self, mode: AcqMode) -> Result<()> {
        match self.acq_mode {
            Some(current) if current != mode => Err(CompileError::MixedAcquisitionModes(self.id)),
            _ => {
                self.acq_mode = Some(mode);
                self.mark_active();
                Ok(())
            }
        }
    }
}
