//! Line framing over a byte stream.
//!
//! The station terminates every observation with a line feed. Reads from the
//! connection carry a timeout, so a quiet link surfaces as
//! [`FramingError::Timeout`] instead of blocking the pipeline thread forever.
use std::io;
use std::io::Read;

use thiserror::Error;

/// Reasons the framer cannot produce a complete line.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("no line received within the idle timeout")]
    Timeout,
    #[error("stream ended with an unterminated line")]
    Incomplete { partial: Vec<u8> },
    #[error("socket read failed: {0}")]
    Read(#[from] io::Error),
}

/// Reassembles line-feed-terminated lines from a byte stream.
pub struct LineFramer<R: Read> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: Read> LineFramer<R> {
    pub fn new(reader: R) -> LineFramer<R> {
        LineFramer {
            reader,
            buffer: Vec::new(),
        }
    }

    /// Returns the next complete line with the line feed (and a trailing
    /// carriage return, if any) stripped.
    ///
    /// `Ok(None)` signals a clean end-of-stream between lines. A stream that
    /// ends in the middle of a line yields [`FramingError::Incomplete`]
    /// carrying the partial buffer, so the caller can route it to the rejects
    /// sink instead of dropping it silently.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        loop {
            if let Some(position) = self.buffer.iter().position(|&byte| byte == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=position).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }

            let mut chunk = [0u8; 1024];
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let partial = std::mem::replace(&mut self.buffer, Vec::new());
                    return Err(FramingError::Incomplete { partial });
                }
                Ok(count) => self.buffer.extend_from_slice(&chunk[..count]),
                Err(ref err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(FramingError::Timeout);
                }
                Err(err) => return Err(FramingError::Read(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out its chunks one `read` call at a time, then
    /// reports `WouldBlock` like a socket whose read timeout expired.
    struct ChunkedReader {
        chunks: Vec<Vec<u8>>,
        blocked_at_end: bool,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                if self.blocked_at_end {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "idle"));
                }
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn yields_lines_and_clean_end_of_stream() {
        let mut framer = LineFramer::new(Cursor::new(b"first,1\nsecond,2\n".to_vec()));
        assert_eq!(framer.next_line().unwrap(), Some(b"first,1".to_vec()));
        assert_eq!(framer.next_line().unwrap(), Some(b"second,2".to_vec()));
        assert_eq!(framer.next_line().unwrap(), None);
    }

    #[test]
    fn strips_carriage_returns() {
        let mut framer = LineFramer::new(Cursor::new(b"a,b,c\r\n".to_vec()));
        assert_eq!(framer.next_line().unwrap(), Some(b"a,b,c".to_vec()));
    }

    #[test]
    fn reassembles_lines_split_across_reads() {
        let reader = ChunkedReader {
            chunks: vec![b"16000".to_vec(), b"00000,3".to_vec(), b"00\n".to_vec()],
            blocked_at_end: false,
        };
        let mut framer = LineFramer::new(reader);
        assert_eq!(framer.next_line().unwrap(), Some(b"1600000000,300".to_vec()));
        assert_eq!(framer.next_line().unwrap(), None);
    }

    #[test]
    fn unterminated_line_at_end_of_stream_is_incomplete() {
        let mut framer = LineFramer::new(Cursor::new(b"complete\ntrailing".to_vec()));
        assert_eq!(framer.next_line().unwrap(), Some(b"complete".to_vec()));
        match framer.next_line() {
            Err(FramingError::Incomplete { partial }) => {
                assert_eq!(partial, b"trailing".to_vec());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn quiet_stream_reports_timeout() {
        let reader = ChunkedReader {
            chunks: vec![b"partial".to_vec()],
            blocked_at_end: true,
        };
        let mut framer = LineFramer::new(reader);
        assert!(matches!(framer.next_line(), Err(FramingError::Timeout)));
    }
}
