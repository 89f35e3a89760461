//! Sequence compiler: turns time-grouped events into the sequencer opcode stream.
//!
//! The sequencer executes one opcode after the other. Only `WAIT(n)` advances time,
//! by `n + 1` ticks of the 250 MHz sequencer clock. All other opcodes take effect at
//! the current tick.
//!
//! Channel activity is expressed through one 32-bit trigger mask, much like digital
//! lines merged into a port word: DAC channel `c` owns bits `2(c-1)` (output) and
//! `2(c-1)+1` (marker), ADC channel `c` owns bit `16 + (c-1)`. Every pulse start and
//! end is an edge on the timeline. At each edge tick the compiler first clears the
//! bits of pulses ending there, then starts the new pulses in registration order.
//!
//! ## Wire format
//!
//! `SEQ <mode_word>,<n_rep-1>,<opcode>,<operand>,...` where the opcodes are
//! `1` wait, `4096` set trigger, `4096+ch` DAC pointer, `4106+ch` ADC acquisition
//! length and `513` end of program.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CompileError, Result};
use crate::event::{AcqMode, Event, EventId, EventKind};
use crate::timing::{sample_spans, samples_to_seq_ticks, TimeGroup, SEQ_CLOCK_HZ};
use crate::utils::fmt_mask;

pub const OP_WAIT: u32 = 1;
pub const OP_SET_TRIGGER: u32 = 4096;
pub const OP_DAC_POINTER: u32 = 4096;
pub const OP_ACQ_LEN: u32 = 4106;
pub const OP_END: u32 = 513;

/// Trigger bits owned by a DAC channel.
pub fn dac_bits(channel: u8) -> u32 {
    0b11 << (2 * (channel as u32 - 1))
}

/// Trigger bit owned by an ADC channel.
pub fn adc_bit(channel: u8) -> u32 {
    1 << (16 + channel as u32 - 1)
}

/// Packs one 4-bit acquisition-mode nibble per ADC channel, channel 1 lowest.
pub fn mode_word(modes: &[(u8, AcqMode)]) -> u32 {
    modes
        .iter()
        .fold(0, |word, (channel, mode)| word | mode.nibble() << (4 * (*channel as u32 - 1)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Wait(u64),
    SetTrigger(u32),
    SetDacPointer { channel: u8, address: usize },
    SetAcqLen { channel: u8, samples: usize },
    End,
}

impl Opcode {
    pub fn code(&self) -> u32 {
        match self {
            Opcode::Wait(_) => OP_WAIT,
            Opcode::SetTrigger(_) => OP_SET_TRIGGER,
            Opcode::SetDacPointer { channel, .. } => OP_DAC_POINTER + *channel as u32,
            Opcode::SetAcqLen { channel, .. } => OP_ACQ_LEN + *channel as u32,
            Opcode::End => OP_END,
        }
    }

    pub fn operand(&self) -> u64 {
        match self {
            Opcode::Wait(n) => *n,
            Opcode::SetTrigger(mask) => *mask as u64,
            Opcode::SetDacPointer { address, .. } => *address as u64,
            Opcode::SetAcqLen { samples, .. } => *samples as u64,
            Opcode::End => 0,
        }
    }

    /// Sequencer ticks consumed by the opcode.
    pub fn ticks(&self) -> u64 {
        match self {
            Opcode::Wait(n) => n + 1,
            _ => 0,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Opcode::Wait(n) => write!(f, "WAIT({})", n),
            Opcode::SetTrigger(mask) => write!(f, "SET_TRIGGER({})", fmt_mask(*mask)),
            Opcode::SetDacPointer { channel, address } => {
                write!(f, "SET_DAC_POINTER(ch{}, {})", channel, address)
            }
            Opcode::SetAcqLen { channel, samples } => {
                write!(f, "SET_ACQ_LEN(ch{}, {})", channel, samples)
            }
            Opcode::End => write!(f, "END"),
        }
    }
}

/// Sequencer-level parameters of one compile call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SequenceParams {
    pub n_rep: u32,
    pub mode_word: u32,
    pub freq_sync: Option<f64>,
    pub sync_required: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledProgram {
    pub ops: Vec<Opcode>,
    /// Ticks per repetition, synchronization padding included.
    pub total_ticks: u64,
    pub n_rep: u32,
    pub mode_word: u32,
    pub sync_padding: u64,
}

impl CompiledProgram {
    /// Renders the `SEQ` upload command.
    pub fn to_command(&self) -> String {
        let mut fields = vec![self.mode_word.to_string(), (self.n_rep - 1).to_string()];
        for op in &self.ops {
            fields.push(op.code().to_string());
            fields.push(op.operand().to_string());
        }
        format!("SEQ {}", fields.join(","))
    }

    /// Sum of the ticks consumed by the opcodes.
    pub fn counted_ticks(&self) -> u64 {
        self.ops.iter().map(Opcode::ticks).sum()
    }
}

/// Sync period in sequencer ticks, checking that `freq_sync` divides the clock.
pub fn sync_period(freq_sync: f64) -> Result<u64> {
    if !(freq_sync > 0.0 && freq_sync <= SEQ_CLOCK_HZ) {
        return Err(CompileError::InvalidFreqSync(freq_sync));
    }
    let period = SEQ_CLOCK_HZ / freq_sync;
    if (period - period.round()).abs() > 1e-9 * period {
        return Err(CompileError::InvalidFreqSync(freq_sync));
    }
    Ok(period.round() as u64)
}

#[derive(Default)]
struct Edges {
    ends: Vec<EventId>,
    starts: Vec<EventId>,
}

/// Compiles grouped events into a sequencer program.
///
/// `operands[i]` is the DAC word address (DAC event) or the acquisition length in
/// ADC samples (ADC event) of event `i`.
pub fn compile_sequence(
    events: &[Event],
    groups: &[TimeGroup],
    operands: &[usize],
    params: &SequenceParams,
) -> Result<CompiledProgram> {
    if params.n_rep == 0 {
        return Err(CompileError::InvalidRepetitions);
    }
    let period = match params.freq_sync {
        Some(freq) => Some(sync_period(freq)?),
        None if params.sync_required => return Err(CompileError::MissingFreqSync),
        None => None,
    };

    // Edge timeline in sequencer ticks
    let spans = sample_spans(events)?;
    let mut tick_spans: Vec<(u64, u64)> = vec![(0, 0); events.len()];
    let mut timeline: BTreeMap<u64, Edges> = BTreeMap::new();
    // Last end over all events, CW pulses included
    let mut max_end: u64 = 0;
    for group in groups {
        let start = group.seq_tick();
        for &id in &group.events {
            let end = samples_to_seq_ticks(spans[id.0].1).max(start + 1);
            tick_spans[id.0] = (start, end);
            max_end = max_end.max(end);
            timeline.entry(start).or_default().starts.push(id);
            if !is_cw(&events[id.0]) {
                timeline.entry(end).or_default().ends.push(id);
            }
        }
    }
    check_overlaps(events, &spans, &tick_spans)?;

    let mut ops = Vec::new();
    let mut mask: u32 = 0;
    let mut cur_tick: u64 = 0;
    for (&tick, edges) in &timeline {
        let first_op = ops.len();
        if tick > cur_tick {
            ops.push(Opcode::Wait(tick - cur_tick - 1));
            cur_tick = tick;
        }
        if !edges.ends.is_empty() {
            for id in &edges.ends {
                mask &= !trigger_bits(&events[id.0]);
            }
            ops.push(Opcode::SetTrigger(mask));
        }
        for id in &edges.starts {
            let event = &events[id.0];
            ops.push(match event.kind {
                EventKind::Dac(_) => Opcode::SetDacPointer {
                    channel: event.channel,
                    address: operands[id.0],
                },
                EventKind::Adc(_) => Opcode::SetAcqLen {
                    channel: event.channel,
                    samples: operands[id.0],
                },
            });
            mask |= trigger_bits(event);
            ops.push(Opcode::SetTrigger(mask));
        }
        log::debug!(
            "tick {}: {}",
            tick,
            ops[first_op..]
                .iter()
                .map(|op| op.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if max_end > cur_tick {
        ops.push(Opcode::Wait(max_end - cur_tick - 1));
        cur_tick = max_end;
    }
    if ops.last() != Some(&Opcode::SetTrigger(0)) {
        ops.push(Opcode::SetTrigger(0));
    }

    let mut sync_padding = 0;
    if let Some(period) = period {
        let remainder = cur_tick % period;
        if remainder != 0 {
            sync_padding = period - remainder;
            ops.push(Opcode::Wait(sync_padding - 1));
            cur_tick += sync_padding;
        }
    }
    ops.push(Opcode::End);

    let program = CompiledProgram {
        ops,
        total_ticks: cur_tick,
        n_rep: params.n_rep,
        mode_word: params.mode_word,
        sync_padding,
    };
    log::info!(
        "compiled {} events into {} opcodes, {} ticks x {} repetitions (sync padding {})",
        events.len(),
        program.ops.len(),
        program.total_ticks,
        program.n_rep,
        program.sync_padding
    );
    Ok(program)
}

fn is_cw(event: &Event) -> bool {
    matches!(&event.kind, EventKind::Dac(dac) if dac.continuous_wave)
}

fn trigger_bits(event: &Event) -> u32 {
    match event.kind {
        EventKind::Dac(_) => dac_bits(event.channel),
        EventKind::Adc(_) => adc_bit(event.channel),
    }
}

/// Rejects pulses of the same kind overlapping in time on one channel, either in
/// sample ticks or after rounding to the sequencer grid. A CW pulse occupies its
/// channel until the end of the program.
fn check_overlaps(events: &[Event], spans: &[(u64, u64)], tick_spans: &[(u64, u64)]) -> Result<()> {
    let open_ended = |idx: usize, end: u64| if is_cw(&events[idx]) { u64::MAX } else { end };
    let mut by_channel: BTreeMap<(bool, u8), Vec<usize>> = BTreeMap::new();
    for (idx, event) in events.iter().enumerate() {
        by_channel
            .entry((event.is_dac(), event.channel))
            .or_default()
            .push(idx);
    }
    for ((_, channel), mut indices) in by_channel {
        indices.sort_by_key(|&idx| spans[idx].0);
        for pair in indices.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if spans[next].0 < open_ended(prev, spans[prev].1)
                || tick_spans[next].0 < open_ended(prev, tick_spans[prev].1)
            {
                return Err(CompileError::OverlappingPulses {
                    channel,
                    first: events[prev].label.clone(),
                    second: events[next].label.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::event::*;
    use crate::sequencer::*;
    use crate::timing::group_by_time;

    fn params(n_rep: u32, freq_sync: Option<f64>) -> SequenceParams {
        SequenceParams {
            n_rep,
            mode_word: 0,
            freq_sync,
            sync_required: false,
        }
    }

    fn dac(label: &str, ch: u8, rel: f64, dur: f64) -> Event {
        let pulse = DacPulse {
            waveform: Waveform::new_sine(10e6, Some(0.5), None),
            dc_offset: 0.0,
            continuous_wave: false,
        };
        Event::new(label, ch, rel, dur, None, EventKind::Dac(pulse)).unwrap()
    }

    fn adc(label: &str, ch: u8, rel: f64, dur: f64) -> Event {
        let pulse = AdcPulse {
            acq_mode: AcqMode::Raw,
        };
        Event::new(label, ch, rel, dur, None, EventKind::Adc(pulse)).unwrap()
    }

    fn compile(events: &[Event], operands: &[usize], params: &SequenceParams) -> Result<CompiledProgram> {
        let groups = group_by_time(events).unwrap();
        compile_sequence(events, &groups, operands, params)
    }

    #[test]
    fn simultaneous_dac_and_adc() {
        let events = vec![dac("drive", 1, 0.0, 1e-6), adc("readout", 2, 0.0, 1e-6)];
        let program = compile(&events, &[0, 2000], &params(1, None)).unwrap();
        let dac_mask = dac_bits(1);
        let both = dac_mask | adc_bit(2);
        assert_eq!(
            program.ops,
            vec![
                Opcode::SetDacPointer { channel: 1, address: 0 },
                Opcode::SetTrigger(dac_mask),
                Opcode::SetAcqLen { channel: 2, samples: 2000 },
                Opcode::SetTrigger(both),
                Opcode::Wait(249),
                Opcode::SetTrigger(0),
                Opcode::End,
            ]
        );
        assert_eq!(program.total_ticks, 250);
        assert_eq!(program.counted_ticks(), 250);
    }

    #[test]
    fn staggered_pulses_keep_other_bits() {
        let events = vec![dac("a", 1, 0.0, 2e-6), dac("b", 3, 1e-6, 2e-6)];
        let program = compile(&events, &[0, 0], &params(3, None)).unwrap();
        let a = dac_bits(1);
        let b = dac_bits(3);
        assert_eq!(
            program.ops,
            vec![
                Opcode::SetDacPointer { channel: 1, address: 0 },
                Opcode::SetTrigger(a),
                Opcode::Wait(249),
                Opcode::SetDacPointer { channel: 3, address: 0 },
                Opcode::SetTrigger(a | b),
                Opcode::Wait(249),
                Opcode::SetTrigger(b),
                Opcode::Wait(249),
                Opcode::SetTrigger(0),
                Opcode::End,
            ]
        );
        assert_eq!(program.total_ticks, 750);
        assert!(program.to_command().starts_with("SEQ 0,2,4097,0,4096,3,1,249,"));
        assert!(program.to_command().ends_with(",1,249,4096,0,513,0"));
    }

    #[test]
    fn back_to_back_pulses_on_one_channel() {
        let mut second = dac("second", 1, 0.0, 1e-6);
        second.parent = Some(EventId(0));
        let events = vec![dac("first", 1, 0.0, 1e-6), second];
        let program = compile(&events, &[0, 250], &params(1, None)).unwrap();
        assert_eq!(
            &program.ops[2..6],
            &[
                Opcode::Wait(249),
                Opcode::SetTrigger(0),
                Opcode::SetDacPointer { channel: 1, address: 250 },
                Opcode::SetTrigger(dac_bits(1)),
            ]
        );
    }

    #[test]
    fn overlap_is_rejected() {
        let events = vec![adc("a", 4, 0.0, 2e-6), adc("b", 4, 1e-6, 2e-6)];
        assert_eq!(
            compile(&events, &[4000, 4000], &params(1, None)),
            Err(CompileError::OverlappingPulses {
                channel: 4,
                first: "a".to_string(),
                second: "b".to_string()
            })
        );
        // Same channel number, different kind: no conflict
        let events = vec![adc("a", 4, 0.0, 2e-6), dac("b", 4, 1e-6, 2e-6)];
        assert!(compile(&events, &[4000, 0], &params(1, None)).is_ok());
    }

    #[test]
    fn sync_padding_and_validation() {
        let events = vec![adc("a", 1, 0.0, 1e-6)];
        // 250 ticks, period 250e6 / 1e6 = 250: already aligned
        let program = compile(&events, &[2000], &params(1, Some(1e6))).unwrap();
        assert_eq!(program.sync_padding, 0);
        // period 300
        let program = compile(&events, &[2000], &params(1, Some(250e6 / 300.0))).unwrap();
        assert_eq!(program.sync_padding, 50);
        assert_eq!(program.total_ticks, 300);
        assert_eq!(program.ops[program.ops.len() - 2], Opcode::Wait(49));

        assert_eq!(
            compile(&events, &[2000], &params(1, Some(3e6))),
            Err(CompileError::InvalidFreqSync(3e6))
        );
        let mut required = params(1, None);
        required.sync_required = true;
        assert_eq!(
            compile(&events, &[2000], &required),
            Err(CompileError::MissingFreqSync)
        );
        assert_eq!(
            compile(&events, &[2000], &params(0, None)),
            Err(CompileError::InvalidRepetitions)
        );
    }

    #[test]
    fn cw_keeps_bits_until_program_end() {
        let pulse = DacPulse {
            waveform: Waveform::new_sine(10e6, Some(0.5), None),
            dc_offset: 0.0,
            continuous_wave: true,
        };
        let cw = Event::new("cw", 2, 0.0, 1e-6, None, EventKind::Dac(pulse)).unwrap();
        let events = vec![cw, adc("readout", 1, 2e-6, 1e-6)];
        let program = compile(&events, &[16134, 2000], &params(1, None)).unwrap();
        assert!(program
            .ops
            .contains(&Opcode::SetTrigger(dac_bits(2) | adc_bit(1))));
        assert_eq!(program.ops[program.ops.len() - 3], Opcode::SetTrigger(dac_bits(2)));
    }

    fn cw(label: &str, ch: u8, rel: f64, dur: f64) -> Event {
        let pulse = DacPulse {
            waveform: Waveform::new_sine(10e6, Some(0.5), None),
            dc_offset: 0.0,
            continuous_wave: true,
        };
        Event::new(label, ch, rel, dur, None, EventKind::Dac(pulse)).unwrap()
    }

    #[test]
    fn lone_cw_pulse_lasts_its_duration() {
        let events = vec![cw("cw", 1, 0.0, 1e-6)];
        let program = compile(&events, &[16134], &params(1, None)).unwrap();
        assert_eq!(
            program.ops,
            vec![
                Opcode::SetDacPointer { channel: 1, address: 16134 },
                Opcode::SetTrigger(dac_bits(1)),
                Opcode::Wait(249),
                Opcode::SetTrigger(0),
                Opcode::End,
            ]
        );
        assert_eq!(program.total_ticks, 250);
        assert_eq!(program.counted_ticks(), 250);
    }

    #[test]
    fn cw_ending_last_pads_past_other_pulses() {
        let events = vec![cw("cw", 2, 0.0, 3e-6), adc("readout", 1, 0.0, 1e-6)];
        let program = compile(&events, &[15634, 2000], &params(1, None)).unwrap();
        assert_eq!(program.total_ticks, 750);
        assert_eq!(
            &program.ops[program.ops.len() - 4..],
            &[
                Opcode::SetTrigger(dac_bits(2)),
                Opcode::Wait(499),
                Opcode::SetTrigger(0),
                Opcode::End,
            ]
        );
    }

    #[test]
    fn cw_occupies_its_channel_until_the_end() {
        let events = vec![cw("cw", 1, 0.0, 1e-6), dac("later", 1, 2e-6, 1e-6)];
        assert_eq!(
            compile(&events, &[16134, 0], &params(1, None)),
            Err(CompileError::OverlappingPulses {
                channel: 1,
                first: "cw".to_string(),
                second: "later".to_string()
            })
        );
        // A pulse before the CW one is fine, and so is another channel
        let events = vec![dac("early", 1, 0.0, 1e-6), cw("cw", 1, 2e-6, 1e-6)];
        assert!(compile(&events, &[0, 16134], &params(1, None)).is_ok());
        let events = vec![cw("cw", 1, 0.0, 1e-6), dac("other", 2, 2e-6, 1e-6)];
        assert!(compile(&events, &[16134, 0], &params(1, None)).is_ok());
    }

    #[test]
    fn mode_word_nibbles() {
        assert_eq!(
            mode_word(&[(1, AcqMode::Accumulated), (2, AcqMode::Raw), (3, AcqMode::Accumulated)]),
            0x101
        );
        assert_eq!(mode_word(&[(8, AcqMode::Accumulated)]), 0x1000_0000);
    }
}
