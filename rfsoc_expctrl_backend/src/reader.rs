//! Acquisition reader: polls the board until the whole run has streamed back,
//! recovers from corrupted streams and turns the frames into per-channel arrays.
//!
//! The reader walks `Idle -> Running -> Draining -> Done`. Any fault seen while
//! running (an error reply, a garbled transfer, too many empty polls in a row, more
//! words than the plan allows, or frames that disagree with the plan) moves it to
//! `Corrupted`; it then stops the board, drains it until an empty reply and restarts
//! the run (`Reset`). The number of restarts is bounded by
//! [`ReaderSettings::max_retries`]; once it is exceeded the acquisition fails with the
//! received and expected word counts instead of returning a partial result.
//!
//! Transport faults that leave the connection unusable (I/O errors, a closed socket)
//! end the acquisition at once, after a best-effort stop of the board.

use std::collections::BTreeMap;
use std::fmt;
use std::thread;
use std::time::Duration;

use ndarray::{s, Array1, Array2, Axis};
use thiserror::Error;

use rfsoc_compiler_backend::{AcqMode, AcquisitionPlan, ChannelPlan, TickTimer};

use crate::board::Board;
use crate::error::AcqError;
use crate::frame::{Frame, FrameError, FrameHeader, FramePayload};
use crate::transport::{PollReply, Transport};
use crate::utils::{Progress, WordCounter};

#[derive(Clone, Debug, PartialEq)]
pub struct ReaderSettings {
    /// Sleep after an empty poll.
    pub poll_interval: Duration,
    /// Consecutive empty polls tolerated while data is still expected.
    pub max_empty_polls: u32,
    /// Restarts after a corrupted stream before giving up.
    pub max_retries: u32,
    /// Polls allowed for the board to fall silent after a stop.
    pub max_drain_polls: u32,
    /// Extra factor applied to accumulated sums.
    pub accumulated_scale: f64,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            max_empty_polls: 1000,
            max_retries: 3,
            max_drain_polls: 1000,
            accumulated_scale: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Running,
    Draining,
    Corrupted,
    Reset,
    Done,
}

/// Why a stream was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Corruption {
    #[error("board replied with an error")]
    ErrorReply,
    #[error("garbled transfer: {0}")]
    Transfer(String),
    #[error("{0} empty polls in a row")]
    EmptyStreak(u32),
    #[error("received {received} words, only {expected} expected")]
    Overrun { received: usize, expected: usize },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("frame from channel {0}, which is not acquiring")]
    UnknownChannel(u8),
    #[error("header of frame {frame} on channel {channel} disagrees with the plan")]
    HeaderMismatch { channel: u8, frame: usize },
    #[error("channel {channel} sent {frames} frames, {expected} expected")]
    FrameCount {
        channel: u8,
        frames: usize,
        expected: usize,
    },
    #[error("cannot shape data of channel {channel}: {reason}")]
    Shape { channel: u8, reason: String },
}

/// Decoded data of one ADC channel, in volts.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    /// Shape `(n_rep, pulses_per_repetition)`: column `p` is pulse `p` over repetitions.
    Accumulated { i: Array2<f64>, q: Array2<f64> },
    /// One trace per pulse, averaged over repetitions.
    Raw { pulses: Vec<Array1<f64>> },
    /// All points in arrival order; `q` is present with the mixer on.
    Continuous {
        i: Array1<f64>,
        q: Option<Array1<f64>>,
    },
}

impl ChannelData {
    pub fn mean(&self) -> f64 {
        match self {
            ChannelData::Accumulated { i, .. } => i.mean().unwrap_or(0.),
            ChannelData::Raw { pulses } => {
                let n: usize = pulses.iter().map(|p| p.len()).sum();
                let sum: f64 = pulses.iter().map(|p| p.sum()).sum();
                if n == 0 {
                    0.
                } else {
                    sum / n as f64
                }
            }
            ChannelData::Continuous { i, .. } => i.mean().unwrap_or(0.),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            ChannelData::Accumulated { i, .. } => i.shape().to_vec(),
            ChannelData::Raw { pulses } => pulses.iter().map(|p| p.len()).collect(),
            ChannelData::Continuous { i, .. } => i.shape().to_vec(),
        }
    }
}

impl fmt::Display for ChannelData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self {
            ChannelData::Accumulated { .. } => "accumulated",
            ChannelData::Raw { .. } => "raw",
            ChannelData::Continuous { .. } => "continuous",
        };
        write!(f, "{} {:?}, mean {:.6} V", kind, self.shape(), self.mean())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionResult {
    /// Keyed by 1-based ADC channel.
    pub channels: BTreeMap<u8, ChannelData>,
    /// Runs started, including the successful one.
    pub attempts: u32,
    pub received_words: usize,
}

#[derive(Default)]
struct ChannelAccum {
    frames: usize,
    i: Vec<f64>,
    q: Vec<f64>,
}

fn check_header(header: &FrameHeader, plan: &ChannelPlan, frame: usize) -> Result<(), Corruption> {
    let dsp = header.dsp_type;
    let pulse = frame % plan.frames_per_rep();
    let consistent = match plan {
        ChannelPlan::Block { mode, .. } => {
            !dsp.is_continuous()
                && dsp.is_accumulated() == (*mode == AcqMode::Accumulated)
                && plan.expected_n(pulse) == Some(header.n as usize)
        }
        ChannelPlan::Continuous { point_lens, mixer } => {
            dsp.is_continuous()
                && dsp.mixer_on() == *mixer
                && header.np_cont as usize == point_lens[pulse]
        }
    };
    if consistent {
        Ok(())
    } else {
        Err(Corruption::HeaderMismatch {
            channel: header.channel,
            frame,
        })
    }
}

fn shape_error(channel: u8) -> impl Fn(ndarray::ShapeError) -> Corruption {
    move |err| Corruption::Shape {
        channel,
        reason: err.to_string(),
    }
}

fn post_process(
    channel: u8,
    plan: &ChannelPlan,
    n_rep: usize,
    accum: ChannelAccum,
) -> Result<ChannelData, Corruption> {
    Ok(match plan {
        ChannelPlan::Block {
            mode: AcqMode::Accumulated,
            pulse_lens,
        } => ChannelData::Accumulated {
            i: Array2::from_shape_vec((n_rep, pulse_lens.len()), accum.i)
                .map_err(shape_error(channel))?,
            q: Array2::from_shape_vec((n_rep, pulse_lens.len()), accum.q)
                .map_err(shape_error(channel))?,
        },
        ChannelPlan::Block { pulse_lens, .. } => {
            let rep_len: usize = pulse_lens.iter().sum();
            let traces = Array2::from_shape_vec((n_rep, rep_len), accum.i)
                .map_err(shape_error(channel))?;
            let mean = traces
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(rep_len));
            let mut start = 0;
            let pulses = pulse_lens
                .iter()
                .map(|&len| {
                    let pulse = mean.slice(s![start..start + len]).to_owned();
                    start += len;
                    pulse
                })
                .collect();
            ChannelData::Raw { pulses }
        }
        ChannelPlan::Continuous { mixer, .. } => ChannelData::Continuous {
            i: Array1::from(accum.i),
            q: mixer.then(|| Array1::from(accum.q)),
        },
    })
}

/// Splits a complete stream into frames, checks them against `plan` and
/// post-processes every channel.
pub fn decode_stream(
    words: &[i16],
    plan: &AcquisitionPlan,
    accumulated_scale: f64,
) -> Result<BTreeMap<u8, ChannelData>, Corruption> {
    let n_rep = plan.n_rep as usize;
    let mut accums: BTreeMap<u8, ChannelAccum> = BTreeMap::new();
    let mut pos = 0;
    while pos < words.len() {
        let (frame, used) = Frame::decode(&words[pos..], accumulated_scale)?;
        let channel = frame.header.channel;
        let chan_plan = plan
            .channels
            .get(&channel)
            .ok_or(Corruption::UnknownChannel(channel))?;
        let expected = chan_plan.frames_per_rep() * n_rep;
        let accum = accums.entry(channel).or_default();
        if accum.frames >= expected {
            return Err(Corruption::FrameCount {
                channel,
                frames: accum.frames + 1,
                expected,
            });
        }
        check_header(&frame.header, chan_plan, accum.frames)?;
        match frame.payload {
            FramePayload::Raw(values) => accum.i.extend(values),
            FramePayload::Accumulated { i, q } => {
                accum.i.push(i);
                accum.q.push(q);
            }
            FramePayload::Continuous { i, q } => {
                accum.i.extend(i);
                accum.q.extend(q.unwrap_or_default());
            }
        }
        accum.frames += 1;
        pos += used;
    }

    let mut channels = BTreeMap::new();
    for (&channel, chan_plan) in &plan.channels {
        let accum = accums.remove(&channel).unwrap_or_default();
        let expected = chan_plan.frames_per_rep() * n_rep;
        if accum.frames != expected {
            return Err(Corruption::FrameCount {
                channel,
                frames: accum.frames,
                expected,
            });
        }
        channels.insert(channel, post_process(channel, chan_plan, n_rep, accum)?);
    }
    Ok(channels)
}

/// Drives one acquisition on a board whose program is already uploaded.
pub struct Reader<'a, T: Transport> {
    board: &'a mut Board<T>,
    plan: &'a AcquisitionPlan,
    settings: &'a ReaderSettings,
    state: ReaderState,
    buffer: Vec<i16>,
    counter: WordCounter,
    attempts: u32,
}

impl<'a, T: Transport> Reader<'a, T> {
    pub fn new(
        board: &'a mut Board<T>,
        plan: &'a AcquisitionPlan,
        settings: &'a ReaderSettings,
    ) -> Self {
        let expected = plan.expected_words();
        Self {
            board,
            plan,
            settings,
            state: ReaderState::Idle,
            buffer: Vec::with_capacity(expected),
            counter: WordCounter::new(expected),
            attempts: 0,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    fn transition(&mut self, next: ReaderState) {
        log::debug!("reader: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Starts the run and blocks until it is fully received and decoded.
    pub fn acquire(&mut self) -> Result<AcquisitionResult, AcqError> {
        let mut timer = TickTimer::new();
        loop {
            self.attempts += 1;
            self.transition(ReaderState::Running);
            let started = self.board.start().map_err(AcqError::from);
            let outcome = match started.and_then(|_| self.receive()) {
                Ok(Ok(())) => decode_stream(&self.buffer, self.plan, self.settings.accumulated_scale),
                Ok(Err(corruption)) => Err(corruption),
                Err(err) => return Err(self.abort(err)),
            };
            match outcome {
                Ok(channels) => {
                    self.transition(ReaderState::Done);
                    timer.tick_log("acquisition");
                    log::info!(
                        "acquired {} words from {} channels in {} attempt(s)",
                        self.counter.received(),
                        channels.len(),
                        self.attempts
                    );
                    return Ok(AcquisitionResult {
                        channels,
                        attempts: self.attempts,
                        received_words: self.counter.received(),
                    });
                }
                Err(corruption) => {
                    log::warn!(
                        "acquisition attempt {} corrupted after {} of {} words: {}",
                        self.attempts,
                        self.counter.received(),
                        self.counter.expected(),
                        corruption
                    );
                    self.transition(ReaderState::Corrupted);
                    let received = self.counter.received();
                    self.board.stop()?;
                    self.drain()?;
                    if self.attempts > self.settings.max_retries {
                        return Err(AcqError::RetriesExhausted {
                            received,
                            expected: self.counter.expected(),
                            attempts: self.attempts,
                        });
                    }
                    self.transition(ReaderState::Reset);
                    self.buffer.clear();
                    self.counter.reset();
                }
            }
        }
    }

    /// Stops the board before giving up on a fatal transport fault.
    fn abort(&mut self, err: AcqError) -> AcqError {
        log::error!("acquisition aborted: {}", err);
        if let Err(stop_err) = self.board.stop() {
            log::warn!("cannot stop the board: {}", stop_err);
        }
        self.transition(ReaderState::Idle);
        err
    }

    /// Polls once. A garbled reply is corruption, any other transport fault is fatal.
    fn poll(&mut self) -> Result<Result<PollReply, Corruption>, AcqError> {
        match self.board.poll() {
            Ok(reply) => Ok(Ok(reply)),
            Err(err) if err.is_garbled() => Ok(Err(Corruption::Transfer(err.to_string()))),
            Err(err) => Err(err.into()),
        }
    }

    /// Collects words until the expected count, then checks that the stream ends.
    fn receive(&mut self) -> Result<Result<(), Corruption>, AcqError> {
        let mut empty_streak = 0;
        while self.counter.progress() == Progress::Incomplete {
            let reply = match self.poll()? {
                Ok(reply) => reply,
                Err(corruption) => return Ok(Err(corruption)),
            };
            match reply {
                PollReply::Data(words) => {
                    empty_streak = 0;
                    self.counter.add(words.len());
                    self.buffer.extend(words);
                }
                PollReply::Empty => {
                    empty_streak += 1;
                    if empty_streak > self.settings.max_empty_polls {
                        return Ok(Err(Corruption::EmptyStreak(empty_streak)));
                    }
                    thread::sleep(self.settings.poll_interval);
                }
                PollReply::Error => return Ok(Err(Corruption::ErrorReply)),
            }
        }
        if self.counter.progress() == Progress::Overrun {
            return Ok(Err(self.overrun()));
        }

        self.transition(ReaderState::Draining);
        match self.poll()? {
            Ok(PollReply::Empty) => Ok(Ok(())),
            Ok(PollReply::Data(words)) => {
                self.counter.add(words.len());
                Ok(Err(self.overrun()))
            }
            Ok(PollReply::Error) => Ok(Err(Corruption::ErrorReply)),
            Err(corruption) => Ok(Err(corruption)),
        }
    }

    fn overrun(&self) -> Corruption {
        Corruption::Overrun {
            received: self.counter.received(),
            expected: self.counter.expected(),
        }
    }

    /// Polls until the board reports nothing pending.
    fn drain(&mut self) -> Result<(), AcqError> {
        for _ in 0..self.settings.max_drain_polls {
            match self.board.poll() {
                Ok(PollReply::Empty) => return Ok(()),
                Ok(PollReply::Data(words)) => log::debug!("discarding {} stale words", words.len()),
                Ok(PollReply::Error) => log::debug!("error reply while draining"),
                Err(err) if err.is_garbled() => log::debug!("garbled reply while draining: {}", err),
                Err(err) => return Err(err.into()),
            }
        }
        Err(AcqError::DrainExhausted(self.settings.max_drain_polls))
    }
}

#[cfg(test)]
mod test {
    use crate::error::TransportError;
    use crate::frame::*;
    use crate::reader::*;
    use crate::transport::MockTransport;

    fn settings(max_retries: u32) -> ReaderSettings {
        ReaderSettings {
            poll_interval: Duration::ZERO,
            max_empty_polls: 3,
            max_retries,
            max_drain_polls: 4,
            accumulated_scale: 1.0,
        }
    }

    fn header(channel: u8, dsp: u8, n: u32, np_cont: u16) -> Vec<i16> {
        FrameHeader {
            channel,
            dsp_type: DspType(dsp),
            n,
            np_cont,
            timestamp: 0,
        }
        .to_words()
        .to_vec()
    }

    fn raw_frame(channel: u8, code: i16, n: usize) -> Vec<i16> {
        let mut words = header(channel, 0, n as u32, 0);
        words.extend(std::iter::repeat(code).take(n));
        words
    }

    fn acc_frame(channel: u8, n: u32, i_sum: i64, q_sum: i64) -> Vec<i16> {
        let mut words = header(channel, 1, n, 0);
        words.extend(sum_words(i_sum));
        words.extend(sum_words(q_sum));
        words
    }

    fn raw_plan(n_rep: u32, pulse_lens: Vec<usize>) -> AcquisitionPlan {
        AcquisitionPlan {
            n_rep,
            channels: BTreeMap::from([(
                1,
                ChannelPlan::Block {
                    mode: AcqMode::Raw,
                    pulse_lens,
                },
            )]),
        }
    }

    /// Five repetitions of a 2000-sample raw window, rep `r` sending code `16 (r + 1)`.
    fn scenario_b_stream() -> Vec<i16> {
        (0..5)
            .flat_map(|rep| raw_frame(1, 16 * (rep + 1), 2000))
            .collect()
    }

    #[test]
    fn raw_result_waits_for_every_word() {
        let plan = raw_plan(5, vec![2000]);
        let stream = scenario_b_stream();
        assert_eq!(stream.len(), plan.expected_words());

        let mut mock = MockTransport::new();
        for (idx, chunk) in stream.chunks(3001).enumerate() {
            mock.push_data(chunk.to_vec());
            if idx % 2 == 0 {
                mock.push_reply(PollReply::Empty);
            }
        }
        let scripted = mock.pending();
        let mut board = Board::new(mock);
        let settings = settings(0);
        let result = Reader::new(&mut board, &plan, &settings).acquire().unwrap();

        // Every scripted reply was consumed, plus the poll confirming the end
        assert_eq!(board.transport().polls(), scripted + 1);
        assert_eq!(result.received_words, 5 * 2008);
        assert_eq!(result.attempts, 1);
        match &result.channels[&1] {
            ChannelData::Raw { pulses } => {
                assert_eq!(pulses.len(), 1);
                assert_eq!(pulses[0].len(), 2000);
                assert!(pulses[0].iter().all(|&v| (v - 3. * ADC_LSB_VOLTS).abs() < 1e-12));
            }
            other => panic!("unexpected data {:?}", other),
        }
        assert_eq!(board.transport().written(), &["SEQ:START"]);
    }

    #[test]
    fn missing_words_exhaust_retries() {
        let plan = raw_plan(5, vec![2000]);
        let stream = scenario_b_stream();
        let mut mock = MockTransport::new();
        mock.push_data(stream[..4 * 2008].to_vec());
        let mut board = Board::new(mock);
        let settings = settings(0);
        let err = Reader::new(&mut board, &plan, &settings).acquire().unwrap_err();
        assert!(matches!(
            err,
            AcqError::RetriesExhausted {
                received: 8032,
                expected: 10040,
                attempts: 1
            }
        ));
        assert_eq!(board.transport().written(), &["SEQ:START", "SEQ:STOP"]);
    }

    #[test]
    fn error_reply_restarts_the_run() {
        let plan = raw_plan(1, vec![16, 8]);
        let mut stream = raw_frame(1, 32, 16);
        stream.extend(raw_frame(1, 64, 8));

        let mut mock = MockTransport::new();
        mock.push_data(stream[..10].to_vec());
        mock.push_reply(PollReply::Error);
        mock.push_data(stream[10..].to_vec());
        mock.push_reply(PollReply::Empty);
        mock.push_data(stream.clone());
        let mut board = Board::new(mock);
        let settings = settings(2);
        let mut reader = Reader::new(&mut board, &plan, &settings);
        let result = reader.acquire().unwrap();
        assert_eq!(reader.state(), ReaderState::Done);
        assert_eq!(result.attempts, 2);
        match &result.channels[&1] {
            ChannelData::Raw { pulses } => {
                assert_eq!(pulses[0].len(), 16);
                assert_eq!(pulses[1].len(), 8);
                assert_eq!(pulses[1][0], 4. * ADC_LSB_VOLTS);
            }
            other => panic!("unexpected data {:?}", other),
        }
        assert_eq!(
            board.transport().written(),
            &["SEQ:START", "SEQ:STOP", "SEQ:START"]
        );
    }

    #[test]
    fn garbled_transfer_restarts_the_run() {
        let plan = raw_plan(1, vec![8]);
        let mut mock = MockTransport::new();
        mock.push_data(raw_frame(1, 16, 8)[..5].to_vec());
        mock.push_fault(TransportError::MalformedBlock("length field".into()));
        mock.push_reply(PollReply::Empty);
        mock.push_data(raw_frame(1, 16, 8));
        let mut board = Board::new(mock);
        let settings = settings(1);
        let result = Reader::new(&mut board, &plan, &settings).acquire().unwrap();
        assert_eq!(result.attempts, 2);
        assert_eq!(result.received_words, 16);
        assert_eq!(
            board.transport().written(),
            &["SEQ:START", "SEQ:STOP", "SEQ:START"]
        );
    }

    #[test]
    fn garbled_transfers_count_against_retries() {
        let plan = raw_plan(1, vec![8]);
        let mut mock = MockTransport::new();
        mock.push_fault(TransportError::MalformedBlock("length field".into()));
        let mut board = Board::new(mock);
        let settings = settings(0);
        let err = Reader::new(&mut board, &plan, &settings).acquire().unwrap_err();
        assert!(matches!(
            err,
            AcqError::RetriesExhausted {
                received: 0,
                expected: 16,
                attempts: 1
            }
        ));
    }

    #[test]
    fn io_fault_stops_the_board() {
        let plan = raw_plan(1, vec![8]);
        let mut mock = MockTransport::new();
        mock.push_data(raw_frame(1, 16, 8)[..5].to_vec());
        mock.push_fault(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "read timed out",
        )));
        let mut board = Board::new(mock);
        let settings = settings(3);
        let mut reader = Reader::new(&mut board, &plan, &settings);
        let err = reader.acquire().unwrap_err();
        assert!(matches!(err, AcqError::Transport(TransportError::Io(_))));
        assert_eq!(reader.state(), ReaderState::Idle);
        assert_eq!(board.transport().written(), &["SEQ:START", "SEQ:STOP"]);
    }

    #[test]
    fn trailing_words_are_an_overrun() {
        let plan = raw_plan(1, vec![8]);
        let mut mock = MockTransport::new();
        mock.push_data(raw_frame(1, 16, 8));
        mock.push_data(vec![1, 2, 3]);
        let mut board = Board::new(mock);
        let settings = settings(0);
        let err = Reader::new(&mut board, &plan, &settings).acquire().unwrap_err();
        assert!(matches!(
            err,
            AcqError::RetriesExhausted {
                received: 19,
                expected: 16,
                ..
            }
        ));
    }

    #[test]
    fn drain_is_bounded() {
        let plan = raw_plan(1, vec![8]);
        let mut mock = MockTransport::new();
        mock.push_reply(PollReply::Error);
        for _ in 0..10 {
            mock.push_data(vec![5; 4]);
        }
        let mut board = Board::new(mock);
        let settings = settings(3);
        let err = Reader::new(&mut board, &plan, &settings).acquire().unwrap_err();
        assert!(matches!(err, AcqError::DrainExhausted(4)));
    }

    #[test]
    fn accumulated_columns_are_pulses() {
        let plan = AcquisitionPlan {
            n_rep: 2,
            channels: BTreeMap::from([(
                3,
                ChannelPlan::Block {
                    mode: AcqMode::Accumulated,
                    pulse_lens: vec![1000, 500],
                },
            )]),
        };
        let mut stream = Vec::new();
        for rep in 0..2 {
            stream.extend(acc_frame(3, 1000, 64_000_000 * (rep + 1), 0));
            stream.extend(acc_frame(3, 500, -1000 * (rep + 1), 1000));
        }
        let channels = decode_stream(&stream, &plan, 1.0).unwrap();
        match &channels[&3] {
            ChannelData::Accumulated { i, q } => {
                assert_eq!(i.shape(), &[2, 2]);
                assert!((i[[0, 0]] - 12.2816).abs() < 1e-9);
                assert!((i[[1, 0]] - 24.5632).abs() < 1e-9);
                assert!(i[[0, 1]] < 0.);
                assert!(q.column(1).iter().all(|&v| v > 0.));
            }
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn continuous_frames_concatenate() {
        let plan = AcquisitionPlan {
            n_rep: 2,
            channels: BTreeMap::from([(
                2,
                ChannelPlan::Continuous {
                    point_lens: vec![4],
                    mixer: true,
                },
            )]),
        };
        let mut stream = Vec::new();
        for _ in 0..2 {
            stream.extend(header(2, 0b10_0010, 0, 4));
            stream.extend([16, -16, 32, -32]);
        }
        let channels = decode_stream(&stream, &plan, 1.0).unwrap();
        match &channels[&2] {
            ChannelData::Continuous { i, q: Some(q) } => {
                assert_eq!(i.len(), 4);
                assert_eq!(q.len(), 4);
                assert_eq!(i[1], 2. * ADC_LSB_VOLTS);
                assert_eq!(q[0], -ADC_LSB_VOLTS);
            }
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn plan_disagreements_are_corruption() {
        let plan = raw_plan(1, vec![8]);
        assert_eq!(
            decode_stream(&raw_frame(1, 0, 9), &plan, 1.0),
            Err(Corruption::HeaderMismatch {
                channel: 1,
                frame: 0
            })
        );
        assert_eq!(
            decode_stream(&raw_frame(2, 0, 8), &plan, 1.0),
            Err(Corruption::UnknownChannel(2))
        );
        let mut twice = raw_frame(1, 0, 8);
        twice.extend(raw_frame(1, 0, 8));
        assert!(matches!(
            decode_stream(&twice, &plan, 1.0),
            Err(Corruption::FrameCount { frames: 2, expected: 1, .. })
        ));
        assert!(matches!(
            decode_stream(&acc_frame(1, 8, 0, 0), &plan, 1.0),
            Err(Corruption::HeaderMismatch { .. })
        ));
        assert_eq!(
            decode_stream(&[], &plan, 1.0),
            Err(Corruption::FrameCount {
                channel: 1,
                frames: 0,
                expected: 1
            })
        );
    }
}
