//! Waveform synthesizer: turns DAC pulse parameters into quantized sample tables
//! laid out the way the DAC waveform memory stores them.
//!
//! A table is a sequence of memory words. Each word carries 8 samples followed by
//! 3 auxiliary fields (2 trigger-output bits and a repeat count), all zero here.
//! Samples are zero-padded up to a whole number of words.

use ndarray::{s, Array1, Array2};
use rayon::prelude::*;

use crate::channel::DacChannel;
use crate::error::{CompileError, Result};
use crate::event::{DacPulse, Event, EventKind, Waveform};
use crate::timing::{samples_to_seq_ticks_ceil, SAMPLES_PER_TICK, SAMPLE_RATE};

/// Fields per memory word: 8 samples, 2 trigger bits, 1 repeat count.
pub const WORD_FIELDS: usize = 11;
/// Longest pulse-mode table [s].
pub const MAX_PULSE_DURATION: f64 = 64e-6;
/// Longest continuous-wave table [samples].
pub const MAX_CW_SAMPLES: usize = 16384;
/// Amplitude budget of a single-tone pulse, including the DC offset.
pub const SINGLE_TONE_BUDGET: f64 = 1.0;
/// Amplitude budget of a dual-tone pulse, including the DC offset.
pub const DUAL_TONE_BUDGET: f64 = 0.926;
pub const SAMPLE_MIN: i16 = -8192;
pub const SAMPLE_MAX: i16 = 8191;
/// Last value of every `DAC:DATA` upload.
pub const UPLOAD_TRAILER_END: i16 = 16383;

/// Rejects waveform parameters the DAC cannot play.
pub fn validate(label: &str, pulse: &DacPulse, samples: usize) -> Result<()> {
    let nyquist = SAMPLE_RATE / 2.0;
    for tone in pulse.waveform.tones() {
        if !(tone.freq >= 0.0 && tone.freq < nyquist) {
            return Err(CompileError::FrequencyOutOfRange {
                label: label.to_string(),
                freq: tone.freq,
                nyquist,
            });
        }
        if !(tone.phase >= 0.0 && tone.phase < 360.0) {
            return Err(CompileError::PhaseOutOfRange {
                label: label.to_string(),
                phase: tone.phase,
            });
        }
    }

    let limit = match pulse.waveform {
        Waveform::Sine(_) => SINGLE_TONE_BUDGET,
        Waveform::DualSine(_, _) => DUAL_TONE_BUDGET,
    };
    let budget = pulse.dc_offset.abs() + pulse.waveform.amplitude_sum();
    if !(budget <= limit) {
        return Err(CompileError::AmplitudeBudget {
            label: label.to_string(),
            budget,
            limit,
        });
    }

    let max_samples = if pulse.continuous_wave {
        MAX_CW_SAMPLES
    } else {
        (MAX_PULSE_DURATION * SAMPLE_RATE).round() as usize
    };
    if samples > max_samples {
        return Err(CompileError::PulseTooLong {
            label: label.to_string(),
            samples,
            limit: max_samples,
        });
    }
    Ok(())
}

/// Number of memory words holding `samples` samples.
pub fn words_for(samples: usize) -> usize {
    samples_to_seq_ticks_ceil(samples as u64) as usize
}

/// Computes the quantized samples of one pulse, zero-padded to whole words.
///
/// `scale` is the sample value of full-scale amplitude, i.e.
/// `8192 * calibration`. Time runs from the pulse start.
///
/// ```
/// use rfsoc_compiler_backend::event::*;
/// use rfsoc_compiler_backend::waveform::synthesize;
///
/// let pulse = DacPulse {
///     waveform: Waveform::new_sine(1e6, Some(0.0), None),
///     dc_offset: 0.25,
///     continuous_wave: false,
/// };
/// let table = synthesize(&pulse, 10, 8192.);
/// assert_eq!(table.len(), 16);
/// assert_eq!(table[9], 2048);
/// assert_eq!(table[10], 0);
/// ```
pub fn synthesize(pulse: &DacPulse, samples: usize, scale: f64) -> Array1<i16> {
    let mut signal = Array1::from_shape_fn(samples, |i| i as f64 / SAMPLE_RATE);
    pulse.waveform.eval_inplace(&mut signal.view_mut());

    let mut table = Array1::<i16>::zeros(words_for(samples) * SAMPLES_PER_TICK as usize);
    let dc = pulse.dc_offset * scale;
    table
        .slice_mut(s![..samples])
        .iter_mut()
        .zip(signal.iter())
        .for_each(|(out, value)| *out = quantize(dc + value * scale));
    table
}

fn quantize(value: f64) -> i16 {
    value
        .round()
        .clamp(SAMPLE_MIN as f64, SAMPLE_MAX as f64) as i16
}

/// A synthesized pulse table placed in one DAC channel's waveform memory.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformTable {
    pub label: String,
    pub channel: u8,
    /// Word address of the first word.
    pub address: usize,
    pub continuous_wave: bool,
    /// Un-padded sample count.
    pub samples: usize,
    /// Shape `(n_words, WORD_FIELDS)`.
    pub words: Array2<i16>,
}

impl WaveformTable {
    /// Packs padded samples into memory words with zeroed auxiliary fields.
    pub fn pack(
        label: &str,
        channel: u8,
        address: usize,
        continuous_wave: bool,
        samples: usize,
        padded: &Array1<i16>,
    ) -> Self {
        let per_word = SAMPLES_PER_TICK as usize;
        let n_words = padded.len() / per_word;
        let mut words = Array2::<i16>::zeros((n_words, WORD_FIELDS));
        for (mut word, chunk) in words
            .outer_iter_mut()
            .zip(padded.exact_chunks(per_word))
        {
            word.slice_mut(s![..per_word]).assign(&chunk);
        }
        Self {
            label: label.to_string(),
            channel,
            address,
            continuous_wave,
            samples,
            words,
        }
    }

    pub fn n_words(&self) -> usize {
        self.words.nrows()
    }

    /// The samples only, in playback order (padding included).
    pub fn samples_flat(&self) -> Array1<i16> {
        let per_word = SAMPLES_PER_TICK as usize;
        Array1::from_iter(self.words.slice(s![.., ..per_word]).iter().copied())
    }

    /// Renders the `DAC:DATA` upload command for this table.
    pub fn to_command(&self) -> String {
        let mut fields: Vec<String> = Vec::with_capacity(self.words.len() + 12);
        fields.push(self.address.to_string());
        fields.extend(self.words.iter().map(|v| v.to_string()));
        fields.extend(std::iter::repeat("0".to_string()).take(10));
        fields.push(UPLOAD_TRAILER_END.to_string());
        format!("DAC:DATA:CH{} {}", self.channel, fields.join(","))
    }
}

/// A pulse that has been validated and given a memory address.
struct Placement<'a> {
    event: &'a Event,
    pulse: &'a DacPulse,
    samples: usize,
    address: usize,
    scale: f64,
}

/// Validates, places and synthesizes every DAC pulse in `events`.
///
/// Memory is allocated sequentially in registration order; the sample
/// computation itself runs in parallel. `dacs[c - 1]` is the state of channel `c`.
pub fn synthesize_all(events: &[Event], dacs: &mut [DacChannel]) -> Result<Vec<WaveformTable>> {
    let mut placements = Vec::new();
    for event in events {
        let EventKind::Dac(pulse) = &event.kind else {
            continue;
        };
        let samples = event.samples();
        validate(&event.label, pulse, samples)?;

        let dac = &mut dacs[(event.channel - 1) as usize];
        let n_words = words_for(samples);
        let address = if pulse.continuous_wave {
            dac.allocate_cw(n_words)?
        } else {
            dac.allocate(n_words)?
        };
        placements.push(Placement {
            event,
            pulse,
            samples,
            address,
            scale: dac.scale(),
        });
    }

    Ok(placements
        .par_iter()
        .map(|p| {
            let padded = synthesize(p.pulse, p.samples, p.scale);
            WaveformTable::pack(
                &p.event.label,
                p.event.channel,
                p.address,
                p.pulse.continuous_wave,
                p.samples,
                &padded,
            )
        })
        .collect())
}
