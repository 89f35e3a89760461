//! Decoding of the frames the board streams back.
//!
//! A frame is an 8-word header followed by its payload. The header, read as the
//! little-endian bytes of its words, is laid out as
//!
//! | bytes | field |
//! |---|---|
//! | 0 | channel (1-based) |
//! | 1 | DSP type: bit 0 accumulated, bit 1 continuous, bit 5 mixer on |
//! | 2..6 | `N`: raw samples or accumulated count (`u32`) |
//! | 6..8 | `NpCont`: points of a continuous frame (`u16`) |
//! | 8..16 | device timestamp (`u64`) |
//!
//! Decoding is a pure function of the words; there is no state carried between frames.

use thiserror::Error;

use rfsoc_compiler_backend::{ACCUMULATED_PAYLOAD_WORDS, HEADER_WORDS};

/// Volts per ADC code after dropping the 4 padding bits.
pub const ADC_LSB_VOLTS: f64 = 0.3838e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("frame truncated: need {needed} words, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("header announces channel {0}")]
    BadChannel(u8),
    #[error("accumulated frame with zero count")]
    ZeroCount,
}

/// The DSP-type header byte. Bits 2-4 and 6-7 are kept as reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DspType(pub u8);

impl DspType {
    const ACCUMULATED: u8 = 1 << 0;
    const CONTINUOUS: u8 = 1 << 1;
    const MIXER: u8 = 1 << 5;

    pub fn is_accumulated(&self) -> bool {
        self.0 & Self::ACCUMULATED != 0
    }

    pub fn is_continuous(&self) -> bool {
        self.0 & Self::CONTINUOUS != 0
    }

    /// Only meaningful for continuous frames.
    pub fn mixer_on(&self) -> bool {
        self.0 & Self::MIXER != 0
    }

    pub fn reserved(&self) -> u8 {
        self.0 & !(Self::ACCUMULATED | Self::CONTINUOUS | Self::MIXER)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: u8,
    pub dsp_type: DspType,
    pub n: u32,
    pub np_cont: u16,
    pub timestamp: u64,
}

fn header_bytes(words: &[i16]) -> [u8; 2 * HEADER_WORDS] {
    let mut bytes = [0u8; 2 * HEADER_WORDS];
    for (dst, word) in bytes.chunks_exact_mut(2).zip(words) {
        dst.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

impl FrameHeader {
    pub fn parse(words: &[i16]) -> Result<Self, FrameError> {
        if words.len() < HEADER_WORDS {
            return Err(FrameError::Truncated {
                needed: HEADER_WORDS,
                available: words.len(),
            });
        }
        let b = header_bytes(&words[..HEADER_WORDS]);
        let header = Self {
            channel: b[0],
            dsp_type: DspType(b[1]),
            n: u32::from_le_bytes([b[2], b[3], b[4], b[5]]),
            np_cont: u16::from_le_bytes([b[6], b[7]]),
            timestamp: u64::from_le_bytes([b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]]),
        };
        if !(1..=8).contains(&header.channel) {
            return Err(FrameError::BadChannel(header.channel));
        }
        Ok(header)
    }

    /// Words following the header.
    pub fn payload_words(&self) -> usize {
        if self.dsp_type.is_continuous() {
            self.np_cont as usize
        } else if self.dsp_type.is_accumulated() {
            ACCUMULATED_PAYLOAD_WORDS
        } else {
            self.n as usize
        }
    }

    /// Inverse of [`FrameHeader::parse`].
    pub fn to_words(&self) -> [i16; HEADER_WORDS] {
        let mut bytes = [0u8; 2 * HEADER_WORDS];
        bytes[0] = self.channel;
        bytes[1] = self.dsp_type.0;
        bytes[2..6].copy_from_slice(&self.n.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.np_cont.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        let mut words = [0i16; HEADER_WORDS];
        for (word, pair) in words.iter_mut().zip(bytes.chunks_exact(2)) {
            *word = i16::from_le_bytes([pair[0], pair[1]]);
        }
        words
    }
}

/// Decoded payload, in volts.
#[derive(Clone, Debug, PartialEq)]
pub enum FramePayload {
    Raw(Vec<f64>),
    Accumulated { i: f64, q: f64 },
    Continuous { i: Vec<f64>, q: Option<Vec<f64>> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: FramePayload,
}

pub fn code_to_volts(code: i16) -> f64 {
    (code >> 4) as f64 * ADC_LSB_VOLTS
}

fn sum_from_words(words: &[i16]) -> i64 {
    let mut bytes = [0u8; 8];
    for (dst, word) in bytes.chunks_exact_mut(2).zip(words) {
        dst.copy_from_slice(&word.to_le_bytes());
    }
    i64::from_le_bytes(bytes)
}

/// Volts of an accumulated sum over `n` samples.
pub fn sum_to_volts(sum: i64, n: u32, accumulated_scale: f64) -> f64 {
    sum as f64 * ADC_LSB_VOLTS / (n as f64 * 2.) * accumulated_scale
}

impl Frame {
    /// Decodes the frame at the start of `words`, returning it with the number of
    /// words it spans.
    pub fn decode(words: &[i16], accumulated_scale: f64) -> Result<(Self, usize), FrameError> {
        let header = FrameHeader::parse(words)?;
        let total = HEADER_WORDS + header.payload_words();
        if words.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                available: words.len(),
            });
        }
        let body = &words[HEADER_WORDS..total];
        let payload = if header.dsp_type.is_continuous() {
            if header.dsp_type.mixer_on() {
                FramePayload::Continuous {
                    i: body.iter().step_by(2).map(|&c| code_to_volts(c)).collect(),
                    q: Some(body.iter().skip(1).step_by(2).map(|&c| code_to_volts(c)).collect()),
                }
            } else {
                FramePayload::Continuous {
                    i: body.iter().map(|&c| code_to_volts(c)).collect(),
                    q: None,
                }
            }
        } else if header.dsp_type.is_accumulated() {
            if header.n == 0 {
                return Err(FrameError::ZeroCount);
            }
            FramePayload::Accumulated {
                i: sum_to_volts(sum_from_words(&body[..4]), header.n, accumulated_scale),
                q: sum_to_volts(sum_from_words(&body[4..]), header.n, accumulated_scale),
            }
        } else {
            FramePayload::Raw(body.iter().map(|&c| code_to_volts(c)).collect())
        };
        Ok((Self { header, payload }, total))
    }
}

/// Splits a 64-bit sum into the four words the board sends for it.
pub fn sum_words(sum: i64) -> [i16; 4] {
    let bytes = sum.to_le_bytes();
    let mut words = [0i16; 4];
    for (word, pair) in words.iter_mut().zip(bytes.chunks_exact(2)) {
        *word = i16::from_le_bytes([pair[0], pair[1]]);
    }
    words
}
