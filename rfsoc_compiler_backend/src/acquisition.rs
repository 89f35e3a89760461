//! Acquisition plan: what the board will stream back for one compiled program.
//!
//! The plan is produced by compilation and consumed by the acquisition reader. It
//! fixes, per active ADC channel, how many frames arrive per repetition and how many
//! words each frame carries, which in turn gives the total word count to wait for.
//!
//! Every frame starts with a [`HEADER_WORDS`]-word header. The payload is
//! - `N` raw codes for a block raw acquisition,
//! - [`ACCUMULATED_PAYLOAD_WORDS`] words (two 64-bit sums) for a block accumulated one,
//! - `NpCont` codes for a continuous acquisition.

use std::collections::BTreeMap;

use crate::channel::AdcChannel;
use crate::error::{CompileError, Result};
use crate::event::{AcqMode, Event, EventKind};
use crate::sequencer::mode_word;
use crate::timing::TimeGroup;

pub const HEADER_WORDS: usize = 8;
pub const ACCUMULATED_PAYLOAD_WORDS: usize = 8;
/// `NpCont` is a 16-bit header field.
pub const MAX_CONTINUOUS_POINTS: usize = u16::MAX as usize;

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelPlan {
    /// One frame per acquisition pulse, `pulse_lens` in ADC samples, in time order.
    Block { mode: AcqMode, pulse_lens: Vec<usize> },
    /// One frame per acquisition pulse carrying `point_lens[p]` codes (`NpCont`).
    /// With the mixer on the codes interleave I and Q, two per ADC sample.
    Continuous { point_lens: Vec<usize>, mixer: bool },
}

impl ChannelPlan {
    pub fn frames_per_rep(&self) -> usize {
        match self {
            ChannelPlan::Block { pulse_lens, .. } => pulse_lens.len(),
            ChannelPlan::Continuous { point_lens, .. } => point_lens.len(),
        }
    }

    /// Payload words of the `pulse`-th frame of a repetition.
    pub fn payload_words(&self, pulse: usize) -> usize {
        match self {
            ChannelPlan::Block {
                mode: AcqMode::Accumulated,
                ..
            } => ACCUMULATED_PAYLOAD_WORDS,
            ChannelPlan::Block { pulse_lens, .. } => pulse_lens[pulse],
            ChannelPlan::Continuous { point_lens, .. } => point_lens[pulse],
        }
    }

    /// Header plus payload words streamed per repetition.
    pub fn words_per_rep(&self) -> usize {
        (0..self.frames_per_rep())
            .map(|pulse| HEADER_WORDS + self.payload_words(pulse))
            .sum()
    }

    /// `N` the header of the `pulse`-th frame must announce (block mode only).
    pub fn expected_n(&self, pulse: usize) -> Option<usize> {
        match self {
            ChannelPlan::Block { pulse_lens, .. } => Some(pulse_lens[pulse]),
            ChannelPlan::Continuous { .. } => None,
        }
    }

    pub fn acq_mode(&self) -> AcqMode {
        match self {
            ChannelPlan::Block { mode, .. } => *mode,
            ChannelPlan::Continuous { .. } => AcqMode::Continuous,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct AcquisitionPlan {
    pub n_rep: u32,
    /// Keyed by 1-based ADC channel.
    pub channels: BTreeMap<u8, ChannelPlan>,
}

impl AcquisitionPlan {
    /// Collects the ADC pulses of `events` in time order.
    ///
    /// `acq_lens[i]` is the acquisition length of event `i` in ADC samples; entries of
    /// DAC events are ignored. Modes are assumed to be consistent per channel. The
    /// mixer setting of `adcs` decides whether continuous frames carry I/Q pairs.
    pub fn from_groups(
        events: &[Event],
        groups: &[TimeGroup],
        acq_lens: &[usize],
        adcs: &[AdcChannel],
        n_rep: u32,
    ) -> Result<Self> {
        let mut channels: BTreeMap<u8, ChannelPlan> = BTreeMap::new();
        for id in groups.iter().flat_map(|group| group.events.iter()) {
            let event = &events[id.0];
            let EventKind::Adc(adc) = &event.kind else {
                continue;
            };
            let mixer = adcs
                .get((event.channel - 1) as usize)
                .map_or(false, |chan| chan.mixer_mhz().is_some());
            let entry = channels
                .entry(event.channel)
                .or_insert_with(|| match adc.acq_mode {
                    AcqMode::Continuous => ChannelPlan::Continuous {
                        point_lens: Vec::new(),
                        mixer,
                    },
                    mode => ChannelPlan::Block {
                        mode,
                        pulse_lens: Vec::new(),
                    },
                });
            match entry {
                ChannelPlan::Block { pulse_lens, .. } => pulse_lens.push(acq_lens[id.0]),
                ChannelPlan::Continuous { point_lens, mixer } => {
                    let points = acq_lens[id.0] * if *mixer { 2 } else { 1 };
                    if points > MAX_CONTINUOUS_POINTS {
                        return Err(CompileError::PulseTooLong {
                            label: event.label.clone(),
                            samples: points,
                            limit: MAX_CONTINUOUS_POINTS,
                        });
                    }
                    point_lens.push(points);
                }
            }
        }
        Ok(Self { n_rep, channels })
    }

    /// Total words (headers included) the board streams for the whole run.
    pub fn expected_words(&self) -> usize {
        self.channels
            .values()
            .map(ChannelPlan::words_per_rep)
            .sum::<usize>()
            * self.n_rep as usize
    }

    /// Total frames the board streams for the whole run.
    pub fn expected_frames(&self) -> usize {
        self.channels
            .values()
            .map(ChannelPlan::frames_per_rep)
            .sum::<usize>()
            * self.n_rep as usize
    }

    /// Sequencer mode word announcing the acquisition mode of every planned channel.
    pub fn mode_word(&self) -> u32 {
        let modes: Vec<(u8, AcqMode)> = self
            .channels
            .iter()
            .map(|(&channel, plan)| (channel, plan.acq_mode()))
            .collect();
        mode_word(&modes)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
