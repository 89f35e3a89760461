//! The experiment module provides the session object through which pulse sequences
//! are described, configured and compiled.
//!
//! ## Overview
//!
//! An [`Experiment`] owns an ordered collection of labelled [`Event`]s together with
//! the state of every DAC and ADC channel of the board. Its behaviour is defined by
//! the [`BaseExperiment`] trait through default implementations on top of a few
//! field accessors; the [`impl_exp_boilerplate!`] macro supplies these accessors so
//! that other crates can define their own experiment types (e.g. one that can also
//! talk to the hardware) without repeating the logic.
//!
//! Events reference their parent by label when they are created. Internally the
//! parent is stored as an [`EventId`], the registration index of the parent. Every
//! call to [`BaseExperiment::compile`] rebuilds the program, the waveform tables and
//! the acquisition plan from scratch.
//!
//! ```
//! use rfsoc_compiler_backend::*;
//!
//! let mut exp = Experiment::new();
//! exp.dac_pulse("drive", 1, 0., 1e-6, None, Waveform::new_sine(10e6, Some(0.5), None), 0., false)
//!     .unwrap();
//! exp.adc_pulse("readout", 2, 0.1e-6, 1e-6, Some("drive"), AcqMode::Raw).unwrap();
//! let compiled = exp.compile(10, None).unwrap();
//! assert!(compiled.program.to_command().starts_with("SEQ 0,9,"));
//! assert_eq!(compiled.plan.channels[&2].words_per_rep(), 8 + 2000);
//! ```

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;

use crate::acquisition::AcquisitionPlan;
use crate::channel::*;
use crate::error::{CompileError, Result};
use crate::event::*;
use crate::sequencer::{compile_sequence, CompiledProgram, SequenceParams};
use crate::timing::{group_by_time, resolve_absolute_times};
use crate::utils::TickTimer;
use crate::waveform::{synthesize_all, WaveformTable};

/// Pattern event labels must match.
pub const LABEL_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_.:-]*$";

lazy_static! {
    static ref LABEL_RE: Option<Regex> = Regex::new(LABEL_PATTERN).ok();
}

fn is_valid_label(label: &str) -> bool {
    LABEL_RE.as_ref().map_or(false, |re| re.is_match(label))
}

/// Everything one compile call produces.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledExperiment {
    pub program: CompiledProgram,
    pub waveforms: Vec<WaveformTable>,
    pub plan: AcquisitionPlan,
}

impl CompiledExperiment {
    /// DAC channels with at least one waveform table, ascending.
    pub fn dac_channels(&self) -> Vec<u8> {
        let mut channels: Vec<u8> = self.waveforms.iter().map(|wf| wf.channel).collect();
        channels.sort_unstable();
        channels.dedup();
        channels
    }
}

/// Defines the behaviour of experiment types through default trait implementations.
///
/// Methods fall into four groups:
/// 1. Event editing: [`add_event`], [`dac_pulse`], [`adc_pulse`], [`set_parent`],
///    [`clear_edit_cache`].
/// 2. Channel configuration: [`set_calibration`], [`set_mixer`], [`set_decimation`],
///    [`set_sync_required`].
/// 3. Compilation: [`compile`], [`absolute_start`].
/// 4. Internal helpers: the field accessors and [`event_id`].
///
/// [`add_event`]: BaseExperiment::add_event
/// [`dac_pulse`]: BaseExperiment::dac_pulse
/// [`adc_pulse`]: BaseExperiment::adc_pulse
/// [`set_parent`]: BaseExperiment::set_parent
/// [`clear_edit_cache`]: BaseExperiment::clear_edit_cache
/// [`set_calibration`]: BaseExperiment::set_calibration
/// [`set_mixer`]: BaseExperiment::set_mixer
/// [`set_decimation`]: BaseExperiment::set_decimation
/// [`set_sync_required`]: BaseExperiment::set_sync_required
/// [`compile`]: BaseExperiment::compile
/// [`absolute_start`]: BaseExperiment::absolute_start
/// [`event_id`]: BaseExperiment::event_id
pub trait BaseExperiment {
    fn events(&self) -> &IndexMap<String, Event>;
    fn events_(&mut self) -> &mut IndexMap<String, Event>;
    fn dacs(&self) -> &Vec<DacChannel>;
    fn dacs_(&mut self) -> &mut Vec<DacChannel>;
    fn adcs(&self) -> &Vec<AdcChannel>;
    fn adcs_(&mut self) -> &mut Vec<AdcChannel>;
    fn sync_required(&self) -> bool;
    fn sync_required_(&mut self) -> &mut bool;

    fn is_edited(&self) -> bool {
        !self.events().is_empty()
    }

    /// Registration index of the event labelled `label`.
    fn event_id(&self, label: &str) -> Result<EventId> {
        self.events()
            .get_index_of(label)
            .map(EventId)
            .ok_or_else(|| CompileError::UnknownEvent(label.to_string()))
    }

    fn event(&self, label: &str) -> Result<&Event> {
        self.events()
            .get(label)
            .ok_or_else(|| CompileError::UnknownEvent(label.to_string()))
    }

    /// Registers an event under a new, unique label.
    ///
    /// `parent` names an already registered event; the new event starts
    /// `relative_start` seconds after the parent's end.
    fn add_event(
        &mut self,
        label: &str,
        channel: u8,
        relative_start: f64,
        duration: f64,
        parent: Option<&str>,
        kind: EventKind,
    ) -> Result<EventId> {
        if !is_valid_label(label) {
            return Err(CompileError::InvalidLabel(label.to_string()));
        }
        if self.events().contains_key(label) {
            return Err(CompileError::DuplicateLabel(label.to_string()));
        }
        let parent = parent.map(|p| self.event_id(p)).transpose()?;
        let event = Event::new(label, channel, relative_start, duration, parent, kind)?;
        let (idx, _) = self.events_().insert_full(label.to_string(), event);
        Ok(EventId(idx))
    }

    /// Registers a DAC output pulse.
    ///
    /// # Example
    /// ```
    /// use rfsoc_compiler_backend::*;
    ///
    /// let mut exp = Experiment::new();
    /// let wf = Waveform::new_dual_sine((5e6, 0.4, 0.), (7e6, 0.4, 90.));
    /// let id = exp.dac_pulse("pi", 3, 0., 2e-6, None, wf, 0.1, false).unwrap();
    /// assert_eq!(id, EventId(0));
    /// assert!(exp.dac_pulse("pi", 3, 0., 2e-6, None, Waveform::new_sine(1e6, None, None), 0., false).is_err());
    /// ```
    #[allow(clippy::too_many_arguments)]
    fn dac_pulse(
        &mut self,
        label: &str,
        channel: u8,
        relative_start: f64,
        duration: f64,
        parent: Option<&str>,
        waveform: Waveform,
        dc_offset: f64,
        continuous_wave: bool,
    ) -> Result<EventId> {
        let kind = EventKind::Dac(DacPulse {
            waveform,
            dc_offset,
            continuous_wave,
        });
        self.add_event(label, channel, relative_start, duration, parent, kind)
    }

    /// Registers an ADC acquisition window.
    fn adc_pulse(
        &mut self,
        label: &str,
        channel: u8,
        relative_start: f64,
        duration: f64,
        parent: Option<&str>,
        acq_mode: AcqMode,
    ) -> Result<EventId> {
        let kind = EventKind::Adc(AdcPulse { acq_mode });
        self.add_event(label, channel, relative_start, duration, parent, kind)
    }

    /// Re-parents an event. Cycles introduced here are reported by [`BaseExperiment::compile`].
    fn set_parent(&mut self, label: &str, parent: Option<&str>) -> Result<()> {
        let parent = parent.map(|p| self.event_id(p)).transpose()?;
        let event = self
            .events_()
            .get_mut(label)
            .ok_or_else(|| CompileError::UnknownEvent(label.to_string()))?;
        event.parent = parent;
        Ok(())
    }

    /// Drops all registered events. Channel configuration is kept.
    fn clear_edit_cache(&mut self) {
        self.events_().clear();
    }

    fn dac_channel(&self, channel: u8) -> Result<&DacChannel> {
        check_channel(channel)?;
        Ok(&self.dacs()[(channel - 1) as usize])
    }

    fn adc_channel(&self, channel: u8) -> Result<&AdcChannel> {
        check_channel(channel)?;
        Ok(&self.adcs()[(channel - 1) as usize])
    }

    fn set_calibration(&mut self, channel: u8, calibration: f64) -> Result<()> {
        check_channel(channel)?;
        self.dacs_()[(channel - 1) as usize].set_calibration(calibration)
    }

    fn set_mixer(&mut self, channel: u8, mixer_mhz: Option<f64>) -> Result<()> {
        check_channel(channel)?;
        self.adcs_()[(channel - 1) as usize].set_mixer(mixer_mhz)
    }

    /// Sets the decimation factor of the tile hosting `channel`, i.e. of `channel`
    /// and its tile sibling.
    fn set_decimation(&mut self, channel: u8, factor: u32) -> Result<()> {
        check_channel(channel)?;
        for ch in [channel, tile_sibling(channel)] {
            self.adcs_()[(ch - 1) as usize].set_decimation(factor)?;
        }
        Ok(())
    }

    fn set_sync_required(&mut self, required: bool) {
        *self.sync_required_() = required;
    }

    /// Absolute start [s] of the event labelled `label`.
    fn absolute_start(&self, label: &str) -> Result<f64> {
        let id = self.event_id(label)?;
        let events: Vec<Event> = self.events().values().cloned().collect();
        Ok(resolve_absolute_times(&events)?[id.0])
    }

    /// Compiles the registered events for `n_rep` repetitions.
    ///
    /// On success the channel state (waveform memory pointers, acquisition modes)
    /// reflects the returned program. On failure the channel state is left as it was.
    fn compile(&mut self, n_rep: u32, freq_sync: Option<f64>) -> Result<CompiledExperiment> {
        let mut timer = TickTimer::new();
        if n_rep == 0 {
            return Err(CompileError::InvalidRepetitions);
        }
        let events: Vec<Event> = self.events().values().cloned().collect();
        let mut dacs = self.dacs().clone();
        let mut adcs = self.adcs().clone();
        dacs.iter_mut().for_each(|dac| dac.clear_compile_cache());
        adcs.iter_mut().for_each(|adc| adc.clear_compile_cache());

        let groups = group_by_time(&events)?;
        timer.tick_log("time resolution");

        for event in &events {
            if let EventKind::Adc(adc) = &event.kind {
                adcs[(event.channel - 1) as usize].claim_mode(adc.acq_mode)?;
            }
        }

        let waveforms = synthesize_all(&events, &mut dacs)?;
        timer.tick_log("waveform synthesis");

        // DAC: word address of the table; ADC: acquisition length in ADC samples
        let mut tables = waveforms.iter();
        let mut operands = Vec::with_capacity(events.len());
        for event in &events {
            operands.push(match event.kind {
                EventKind::Dac(_) => {
                    dacs[(event.channel - 1) as usize].mark_active();
                    tables.next().map_or(0, |table| table.address)
                }
                EventKind::Adc(_) => {
                    let decimation = adcs[(event.channel - 1) as usize].decimation();
                    (event.samples() as f64 / decimation as f64).round() as usize
                }
            });
        }

        let plan = AcquisitionPlan::from_groups(&events, &groups, &operands, &adcs, n_rep)?;
        let params = SequenceParams {
            n_rep,
            mode_word: plan.mode_word(),
            freq_sync,
            sync_required: self.sync_required(),
        };
        let program = compile_sequence(&events, &groups, &operands, &params)?;
        timer.tick_log("sequence compilation");

        log::info!(
            "compiled {} events: {} waveform tables, {} acquisition channels, {} words expected",
            events.len(),
            waveforms.len(),
            plan.channels.len(),
            plan.expected_words()
        );
        *self.dacs_() = dacs;
        *self.adcs_() = adcs;
        Ok(CompiledExperiment {
            program,
            waveforms,
            plan,
        })
    }
}

/// Fresh per-channel state for all DAC channels.
pub fn default_dacs() -> Vec<DacChannel> {
    (1..=NUM_CHANNELS)
        .filter_map(|ch| DacChannel::new(ch).ok())
        .collect()
}

/// Fresh per-channel state for all ADC channels.
pub fn default_adcs() -> Vec<AdcChannel> {
    (1..=NUM_CHANNELS)
        .filter_map(|ch| AdcChannel::new(ch).ok())
        .collect()
}

/// Generates the [`BaseExperiment`] accessors for a struct with the fields
/// `events: IndexMap<String, Event>`, `dacs: Vec<DacChannel>`,
/// `adcs: Vec<AdcChannel>` and `sync_required: bool`.
///
/// ```
/// use indexmap::IndexMap;
/// use rfsoc_compiler_backend::*;
///
/// struct CustomExperiment {
///     events: IndexMap<String, Event>,
///     dacs: Vec<DacChannel>,
///     adcs: Vec<AdcChannel>,
///     sync_required: bool,
///     operator: String,
/// }
/// impl_exp_boilerplate!(CustomExperiment);
///
/// let mut exp = CustomExperiment {
///     events: IndexMap::new(),
///     dacs: default_dacs(),
///     adcs: default_adcs(),
///     sync_required: false,
///     operator: "alice".into(),
/// };
/// exp.adc_pulse("readout", 1, 0., 1e-6, None, AcqMode::Accumulated).unwrap();
/// assert!(exp.is_edited());
/// ```
#[macro_export]
macro_rules! impl_exp_boilerplate {
    ($exp_type: ty) => {
        impl $crate::experiment::BaseExperiment for $exp_type {
            fn events(&self) -> &indexmap::IndexMap<String, $crate::event::Event> {
                &self.events
            }
            fn events_(&mut self) -> &mut indexmap::IndexMap<String, $crate::event::Event> {
                &mut self.events
            }
            fn dacs(&self) -> &Vec<$crate::channel::DacChannel> {
                &self.dacs
            }
            fn dacs_(&mut self) -> &mut Vec<$crate::channel::DacChannel> {
                &mut self.dacs
            }
            fn adcs(&self) -> &Vec<$crate::channel::AdcChannel> {
                &self.adcs
            }
            fn adcs_(&mut self) -> &mut Vec<$crate::channel::AdcChannel> {
                &mut self.adcs
            }
            fn sync_required(&self) -> bool {
                self.sync_required
            }
            fn sync_required_(&mut self) -> &mut bool {
                &mut self.sync_required
            }
        }
    };
}

/// Hardware-free experiment session.
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
}

#[cfg(test)]
mod test {
    use crate::experiment::*;
    use crate::sequencer::{adc_bit, dac_bits, Opcode};

    fn sine() -> Waveform {
        Waveform::new_sine(4e6, Some(0.5), None)
    }

    #[test]
    fn labels_are_checked() {
        let mut exp = Experiment::new();
        assert_eq!(
            exp.adc_pulse("1st", 1, 0., 1e-6, None, AcqMode::Raw),
            Err(CompileError::InvalidLabel("1st".to_string()))
        );
        assert_eq!(
            exp.adc_pulse("", 1, 0., 1e-6, None, AcqMode::Raw),
            Err(CompileError::InvalidLabel("".to_string()))
        );
        exp.adc_pulse("q0.read:a-1", 1, 0., 1e-6, None, AcqMode::Raw)
            .unwrap();
        assert_eq!(
            exp.adc_pulse("q0.read:a-1", 2, 0., 1e-6, None, AcqMode::Raw),
            Err(CompileError::DuplicateLabel("q0.read:a-1".to_string()))
        );
        assert_eq!(
            exp.adc_pulse("x", 2, 0., 1e-6, Some("missing"), AcqMode::Raw),
            Err(CompileError::UnknownEvent("missing".to_string()))
        );
        // Rejected events are not registered
        assert_eq!(exp.events().len(), 1);
    }

    #[test]
    fn label_pattern_is_reused_across_calls() {
        assert!(LABEL_RE.is_some());
        for _ in 0..3 {
            assert!(is_valid_label("readout_1"));
            assert!(!is_valid_label("9lives"));
        }
    }

    #[test]
    fn parent_chain_sets_start() {
        let mut exp = Experiment::new();
        exp.dac_pulse("a", 1, 1e-6, 2e-6, None, sine(), 0., false)
            .unwrap();
        exp.adc_pulse("b", 1, 0.5e-6, 1e-6, Some("a"), AcqMode::Raw)
            .unwrap();
        assert!((exp.absolute_start("b").unwrap() - 3.5e-6).abs() < 1e-15);
        exp.set_parent("b", None).unwrap();
        assert!((exp.absolute_start("b").unwrap() - 0.5e-6).abs() < 1e-15);
    }

    #[test]
    fn cycle_from_set_parent_fails_compile() {
        let mut exp = Experiment::new();
        exp.adc_pulse("a", 1, 0., 1e-6, None, AcqMode::Raw).unwrap();
        exp.adc_pulse("b", 2, 0., 1e-6, Some("a"), AcqMode::Raw)
            .unwrap();
        exp.set_parent("a", Some("b")).unwrap();
        assert!(matches!(
            exp.compile(1, None),
            Err(CompileError::CyclicHierarchy(_))
        ));
    }

    #[test]
    fn mixed_modes_fail_and_leave_state() {
        let mut exp = Experiment::new();
        exp.adc_pulse("a", 3, 0., 1e-6, None, AcqMode::Raw).unwrap();
        exp.adc_pulse("b", 3, 1e-6, 1e-6, Some("a"), AcqMode::Accumulated)
            .unwrap();
        assert_eq!(
            exp.compile(1, None),
            Err(CompileError::MixedAcquisitionModes(3))
        );
        assert_eq!(exp.adc_channel(3).unwrap().acq_mode(), None);
    }

    #[test]
    fn compile_wires_addresses_and_lengths() {
        let mut exp = Experiment::new();
        exp.set_decimation(2, 4).unwrap();
        assert_eq!(exp.adc_channel(1).unwrap().decimation(), 4);
        exp.dac_pulse("d0", 1, 0., 1e-6, None, sine(), 0., false)
            .unwrap();
        exp.dac_pulse("d1", 1, 0., 1e-6, Some("d0"), sine(), 0., false)
            .unwrap();
        exp.adc_pulse("r0", 1, 0., 1e-6, None, AcqMode::Accumulated)
            .unwrap();
        let compiled = exp.compile(4, None).unwrap();

        assert_eq!(compiled.dac_channels(), vec![1]);
        assert_eq!(compiled.waveforms[1].address, 250);
        assert!(compiled.program.ops.contains(&Opcode::SetDacPointer {
            channel: 1,
            address: 250
        }));
        assert!(compiled
            .program
            .ops
            .contains(&Opcode::SetAcqLen { channel: 1, samples: 500 }));
        assert!(compiled
            .program
            .ops
            .contains(&Opcode::SetTrigger(dac_bits(1) | adc_bit(1))));
        assert_eq!(compiled.program.mode_word, 0x1);
        assert_eq!(compiled.plan.expected_words(), 4 * 16);
        assert_eq!(exp.dac_channel(1).unwrap().next_free(), 500);
        assert!(exp.dac_channel(1).unwrap().is_active());

        // Recompiling starts from a clean memory map
        let again = exp.compile(4, None).unwrap();
        assert_eq!(again.waveforms[0].address, 0);
    }

    #[test]
    fn clear_edit_cache_keeps_configuration() {
        let mut exp = Experiment::new();
        exp.set_calibration(5, 0.8).unwrap();
        exp.adc_pulse("a", 1, 0., 1e-6, None, AcqMode::Raw).unwrap();
        exp.clear_edit_cache();
        assert!(!exp.is_edited());
        assert_eq!(exp.dac_channel(5).unwrap().calibration(), 0.8);
        assert!(exp.set_calibration(9, 0.8).is_err());
    }
}
