//! Line-oriented command channel to the board.
//!
//! Commands are ASCII lines. Data polls (`OUTPUT:DATA?`) are answered either with an
//! IEEE-488.2 definite-length block (`#<d><len><bytes>\n`) of little-endian `i16`
//! words, or, when the board is in ASCII output mode or reports a fault, with a text
//! line. Every poll is classified into a [`PollReply`] at this boundary so nothing
//! above it deals with sentinel values.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::TransportError;

pub const POLL_QUERY: &str = "OUTPUT:DATA?";
const ERROR_LINE_PATTERN: &str = r"^\s*ERR";

/// Outcome of one data poll.
#[derive(Clone, Debug, PartialEq)]
pub enum PollReply {
    Data(Vec<i16>),
    Empty,
    Error,
}

impl PollReply {
    /// A block holding nothing or a single `0` means no data is pending, a single
    /// negative word is the board's error code.
    pub fn from_words(words: Vec<i16>) -> Self {
        match words.as_slice() {
            [] | [0] => PollReply::Empty,
            [code] if *code < 0 => PollReply::Error,
            _ => PollReply::Data(words),
        }
    }
}

pub trait Transport {
    fn write_line(&mut self, cmd: &str) -> Result<(), TransportError>;

    fn read_line(&mut self) -> Result<String, TransportError>;

    fn query(&mut self, cmd: &str) -> Result<String, TransportError> {
        self.write_line(cmd)?;
        self.read_line()
    }

    /// Issues one `OUTPUT:DATA?` and classifies the reply.
    fn poll_data(&mut self) -> Result<PollReply, TransportError>;
}

pub fn decode_words(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Wraps `words` into a definite-length block, terminator included.
pub fn encode_block(words: &[i16]) -> Vec<u8> {
    let payload: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
    let len = payload.len().to_string();
    let mut block = format!("#{}{}", len.len(), len).into_bytes();
    block.extend(payload);
    block.push(b'\n');
    block
}

lazy_static! {
    static ref ERROR_LINE_RE: Option<Regex> = Regex::new(ERROR_LINE_PATTERN).ok();
}

fn is_error_line(line: &str) -> bool {
    ERROR_LINE_RE.as_ref().map_or(false, |re| re.is_match(line))
}

/// Parses a text reply to a data poll: an error line or comma separated codes.
pub fn parse_ascii_reply(line: &str) -> Result<PollReply, TransportError> {
    let line = line.trim();
    if is_error_line(line) {
        return Ok(PollReply::Error);
    }
    if line.is_empty() {
        return Ok(PollReply::Empty);
    }
    let words = line
        .split(',')
        .map(|field| field.trim().parse::<i16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| TransportError::MalformedBlock(format!("unexpected reply '{}'", line)))?;
    Ok(PollReply::from_words(words))
}

fn closed_on_eof(err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(err)
    }
}

/// Blocking TCP connection to the board's command port.
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", host))
        })?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        log::info!("connected to board at {}", addr);
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf).map_err(closed_on_eof)?;
        Ok(buf)
    }

    /// Reads the rest of a definite-length block whose leading `#` is consumed.
    fn read_block(&mut self) -> Result<Vec<u8>, TransportError> {
        let digits = self.read_bytes(1)?;
        let n_digits = match (digits[0] as char).to_digit(10) {
            Some(d) if d > 0 => d as usize,
            _ => {
                return Err(TransportError::MalformedBlock(format!(
                    "bad length digit {:?}",
                    digits[0] as char
                )))
            }
        };
        let len_field = String::from_utf8(self.read_bytes(n_digits)?)?;
        let len: usize = len_field
            .parse()
            .map_err(|_| TransportError::MalformedBlock(format!("bad length '{}'", len_field)))?;
        if len % 2 != 0 {
            return Err(TransportError::MalformedBlock(format!(
                "odd byte count {}",
                len
            )));
        }
        let payload = self.read_bytes(len)?;
        if self.read_bytes(1)?[0] != b'\n' {
            return Err(TransportError::MalformedBlock(
                "missing block terminator".into(),
            ));
        }
        Ok(payload)
    }
}

impl Transport for TcpTransport {
    fn write_line(&mut self, cmd: &str) -> Result<(), TransportError> {
        log::trace!("-> {}", cmd);
        self.writer.write_all(cmd.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Err(TransportError::Closed);
        }
        let line = String::from_utf8(buf)?;
        Ok(line.trim_end().to_string())
    }

    fn poll_data(&mut self) -> Result<PollReply, TransportError> {
        self.write_line(POLL_QUERY)?;
        let lead = self.read_bytes(1)?;
        if lead[0] == b'#' {
            let payload = self.read_block()?;
            return Ok(PollReply::from_words(decode_words(&payload)));
        }
        let mut buf = lead;
        self.reader.read_until(b'\n', &mut buf)?;
        parse_ascii_reply(&String::from_utf8(buf)?)
    }
}

/// Scripted in-memory board.
///
/// Polls pop the scripted replies (or faults) in order and return
/// [`PollReply::Empty`] once the script is exhausted. Every written command is
/// recorded; polls are only counted.
#[derive(Debug, Default)]
pub struct MockTransport {
    written: Vec<String>,
    replies: VecDeque<Result<PollReply, TransportError>>,
    lines: VecDeque<String>,
    polls: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&mut self, reply: PollReply) {
        self.replies.push_back(Ok(reply));
    }

    pub fn push_data(&mut self, words: Vec<i16>) {
        self.replies.push_back(Ok(PollReply::Data(words)));
    }

    /// Makes the next unanswered poll fail with `err`.
    pub fn push_fault(&mut self, err: TransportError) {
        self.replies.push_back(Err(err));
    }

    pub fn push_line(&mut self, line: &str) {
        self.lines.push_back(line.to_string());
    }

    pub fn written(&self) -> &[String] {
        &self.written
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    /// Scripted replies not yet consumed.
    pub fn pending(&self) -> usize {
        self.replies.len()
    }
}

impl Transport for MockTransport {
    fn write_line(&mut self, cmd: &str) -> Result<(), TransportError> {
        self.written.push(cmd.to_string());
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        self.lines.pop_front().ok_or(TransportError::Closed)
    }

    fn poll_data(&mut self) -> Result<PollReply, TransportError> {
        self.polls += 1;
        self.replies.pop_front().unwrap_or(Ok(PollReply::Empty))
    }
}

#[cfg(test)]
mod test {
    use crate::transport::*;
    use std::net::TcpListener;

    #[test]
    fn reply_classification() {
        assert_eq!(PollReply::from_words(vec![]), PollReply::Empty);
        assert_eq!(PollReply::from_words(vec![0]), PollReply::Empty);
        assert_eq!(PollReply::from_words(vec![-1]), PollReply::Error);
        assert_eq!(PollReply::from_words(vec![7]), PollReply::Data(vec![7]));
        assert_eq!(
            PollReply::from_words(vec![0, 0]),
            PollReply::Data(vec![0, 0])
        );
    }

    #[test]
    fn ascii_replies() {
        assert_eq!(parse_ascii_reply("ERR: overflow\n").unwrap(), PollReply::Error);
        assert_eq!(parse_ascii_reply("").unwrap(), PollReply::Empty);
        assert_eq!(
            parse_ascii_reply("1, -2,3").unwrap(),
            PollReply::Data(vec![1, -2, 3])
        );
        assert!(matches!(
            parse_ascii_reply("1,x"),
            Err(TransportError::MalformedBlock(_))
        ));
    }

    #[test]
    fn block_encoding() {
        assert_eq!(encode_block(&[1, -1]), b"#14\x01\x00\xff\xff\n".to_vec());
        assert_eq!(decode_words(&[0x01, 0x00, 0xff, 0xff]), vec![1, -1]);
    }

    #[test]
    fn tcp_polls_blocks_and_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let board = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut out = stream;
            let replies: Vec<Vec<u8>> = vec![
                encode_block(&[3, 4, -5]),
                encode_block(&[]),
                b"ERR -7\n".to_vec(),
                b"42\n".to_vec(),
            ];
            for reply in replies {
                let mut cmd = String::new();
                reader.read_line(&mut cmd).unwrap();
                assert_eq!(cmd.trim_end(), POLL_QUERY);
                out.write_all(&reply).unwrap();
            }
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();
        assert_eq!(
            transport.poll_data().unwrap(),
            PollReply::Data(vec![3, 4, -5])
        );
        assert_eq!(transport.poll_data().unwrap(), PollReply::Empty);
        assert_eq!(transport.poll_data().unwrap(), PollReply::Error);
        assert_eq!(transport.poll_data().unwrap(), PollReply::Data(vec![42]));
        board.join().unwrap();
    }

    #[test]
    fn mock_records_and_replays() {
        let mut mock = MockTransport::new();
        mock.push_data(vec![1, 2]);
        mock.push_line("RFSoC,1.0");
        mock.write_line("SEQ:START").unwrap();
        assert_eq!(mock.query("*IDN?").unwrap(), "RFSoC,1.0");
        assert_eq!(mock.poll_data().unwrap(), PollReply::Data(vec![1, 2]));
        assert_eq!(mock.poll_data().unwrap(), PollReply::Empty);
        assert_eq!(mock.written(), &["SEQ:START", "*IDN?"]);
        assert_eq!(mock.polls(), 2);
        assert!(matches!(mock.read_line(), Err(TransportError::Closed)));
    }

    #[test]
    fn mock_replays_faults_in_order() {
        let mut mock = MockTransport::new();
        mock.push_fault(TransportError::MalformedBlock("bad length".into()));
        mock.push_reply(PollReply::Error);
        let err = mock.poll_data().unwrap_err();
        assert!(err.is_garbled());
        assert!(!TransportError::Closed.is_garbled());
        assert_eq!(mock.poll_data().unwrap(), PollReply::Error);
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn error_lines_match_repeatedly() {
        assert!(ERROR_LINE_RE.is_some());
        for _ in 0..3 {
            assert_eq!(parse_ascii_reply("  ERR 12").unwrap(), PollReply::Error);
            assert_eq!(parse_ascii_reply("12").unwrap(), PollReply::Data(vec![12]));
        }
    }
}
