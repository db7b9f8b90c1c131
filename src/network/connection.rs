use std::io::{ErrorKind, Read, Write};

use tracing::{debug, warn};

use crate::error::Error;
use crate::protocol::frame;
use crate::protocol::value::{Value, ERR_TOO_BIG};
use crate::protocol::CommandExecutor;

/// Connection lifecycle. `ReadingRequest` and `WritingResponse` alternate;
/// `Closing` is terminal and reached directly from either on end-of-stream,
/// protocol violations, or unrecoverable I/O errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    ReadingRequest,
    WritingResponse,
    Closing,
}

/// Per-connection protocol state machine.
///
/// Owns a fixed-capacity read buffer (0..N partially or fully received
/// frames) and a write buffer with a bytes-sent cursor. All I/O is
/// non-blocking: `WouldBlock` yields back to the event loop, `Interrupted`
/// retries immediately, and everything else closes this connection only.
///
/// The stream is any `Read + Write`, so tests drive the machine with
/// scripted streams instead of sockets.
pub struct Connection {
    state: ConnState,
    read_buf: Box<[u8]>,
    read_len: usize,
    write_buf: Vec<u8>,
    write_pos: usize,
}

impl Connection {
    /// `buffer_size` must be at least one full frame; the config layer
    /// enforces that bound.
    pub fn new(buffer_size: usize) -> Self {
        debug_assert!(buffer_size >= frame::MAX_FRAME_SIZE);
        Self {
            state: ConnState::ReadingRequest,
            read_buf: vec![0u8; buffer_size].into_boxed_slice(),
            read_len: 0,
            write_buf: Vec::with_capacity(buffer_size),
            write_pos: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_closing(&self) -> bool {
        self.state == ConnState::Closing
    }

    /// Whether the event loop should wait for write readiness.
    pub fn wants_write(&self) -> bool {
        self.state == ConnState::WritingResponse
    }

    /// Drive the state machine for one readiness notification, looping
    /// until the stream would block, the write side is waiting on
    /// readiness, or the connection is closing.
    ///
    /// Reading and writing interleave: as soon as responses are queued the
    /// machine attempts an optimistic flush, and a completed flush resumes
    /// reading, so a pipelining client is answered batch after batch
    /// within a single notification.
    pub fn drive<S>(&mut self, stream: &mut S, executor: &mut CommandExecutor)
    where
        S: Read + Write,
    {
        loop {
            let progressed = match self.state {
                ConnState::ReadingRequest => self.try_fill(stream, executor),
                ConnState::WritingResponse => self.try_flush(stream),
                ConnState::Closing => false,
            };
            if !progressed {
                return;
            }
        }
    }

    /// One non-blocking read into the buffer tail, then frame processing.
    /// Returns false when the caller must wait for the next notification.
    fn try_fill<S>(&mut self, stream: &mut S, executor: &mut CommandExecutor) -> bool
    where
        S: Read,
    {
        let n = loop {
            match stream.read(&mut self.read_buf[self.read_len..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) => {
                    debug!("read failed: {e}");
                    self.state = ConnState::Closing;
                    return false;
                }
            }
        };
        if n == 0 {
            if self.read_len > 0 {
                warn!("peer closed the stream mid-frame");
            } else {
                debug!("peer disconnected");
            }
            self.state = ConnState::Closing;
            return false;
        }
        self.read_len += n;
        self.process_requests(executor);
        self.state != ConnState::Closing
    }

    /// Extract and answer every complete frame currently buffered.
    ///
    /// Responses are appended to the write buffer in arrival order, which
    /// is what makes pipelining work: one read may queue many answers.
    fn process_requests(&mut self, executor: &mut CommandExecutor) {
        let mut consumed = 0;
        loop {
            let next = match frame::extract_request(&self.read_buf[consumed..self.read_len]) {
                Ok(next) => next,
                Err(reason) => {
                    // Fatal for this connection; no response for the
                    // offending frame, queued output is discarded.
                    debug!("closing connection: {}", Error::Protocol(reason));
                    self.state = ConnState::Closing;
                    return;
                }
            };
            let Some((args, used)) = next else { break };
            let response = executor.dispatch(args);
            self.push_response(&response);
            consumed += used;
        }
        if consumed > 0 {
            self.read_buf.copy_within(consumed..self.read_len, 0);
            self.read_len -= consumed;
        }
        if !self.write_buf.is_empty() {
            self.state = ConnState::WritingResponse;
        }
    }

    /// Serialize a response into the write buffer, replacing payloads that
    /// cannot fit one frame with an in-band error.
    fn push_response(&mut self, value: &Value) {
        let mut payload = Vec::new();
        value.write(&mut payload);
        if !frame::payload_fits(payload.len()) {
            payload.clear();
            Value::error(ERR_TOO_BIG, "response is too big").write(&mut payload);
        }
        frame::write_frame(&payload, &mut self.write_buf);
    }

    /// One non-blocking write of the unsent tail. Returns false when the
    /// caller must wait; a full drain resets both cursors and resumes
    /// reading.
    fn try_flush<S>(&mut self, stream: &mut S) -> bool
    where
        S: Write,
    {
        let n = loop {
            match stream.write(&self.write_buf[self.write_pos..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) => {
                    debug!("write failed: {e}");
                    self.state = ConnState::Closing;
                    return false;
                }
            }
        };
        if n == 0 {
            debug!("write side closed");
            self.state = ConnState::Closing;
            return false;
        }
        self.write_pos += n;
        if self.write_pos == self.write_buf.len() {
            self.write_buf.clear();
            self.write_pos = 0;
            self.state = ConnState::ReadingRequest;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_request, ERR_UNKNOWN};
    use bytes::Bytes;
    use std::io;

    /// Scripted stream: serves queued input one `read` at a time, accepts
    /// at most `write_quota` bytes per `write`, and counts calls.
    struct Script {
        input: Vec<Vec<u8>>,
        eof_after_input: bool,
        output: Vec<u8>,
        write_quota: usize,
        reads: usize,
        writes: usize,
    }

    impl Script {
        fn new(input: Vec<Vec<u8>>) -> Self {
            Self {
                input,
                eof_after_input: false,
                output: Vec::new(),
                write_quota: usize::MAX,
                reads: 0,
                writes: 0,
            }
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.input.is_empty() {
                if self.eof_after_input {
                    return Ok(0);
                }
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            self.reads += 1;
            let chunk = self.input.remove(0);
            assert!(chunk.len() <= buf.len(), "scripted chunk exceeds buffer");
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.write_quota == 0 {
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            self.writes += 1;
            let n = buf.len().min(self.write_quota);
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn request(parts: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_request(parts, &mut out).unwrap();
        out
    }

    fn decode_responses(mut buf: &[u8]) -> Vec<Value> {
        let mut out = Vec::new();
        while !buf.is_empty() {
            let (head, rest) = buf.split_first_chunk::<4>().unwrap();
            let len = u32::from_le_bytes(*head) as usize;
            let (payload, tail) = rest.split_at(len);
            let (value, used) = Value::read(payload).unwrap();
            assert_eq!(used, len, "response frame has trailing bytes");
            out.push(value);
            buf = tail;
        }
        out
    }

    #[test]
    fn three_pipelined_requests_one_read_three_ordered_responses() {
        let mut batch = Vec::new();
        batch.extend_from_slice(&request(&[b"set", b"k", b"v"]));
        batch.extend_from_slice(&request(&[b"get", b"k"]));
        batch.extend_from_slice(&request(&[b"get", b"missing"]));

        let mut stream = Script::new(vec![batch]);
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();
        conn.drive(&mut stream, &mut executor);

        assert_eq!(stream.reads, 1, "all three frames must arrive in one read");
        assert_eq!(conn.state(), ConnState::ReadingRequest);
        assert_eq!(
            decode_responses(&stream.output),
            vec![
                Value::Nil,
                Value::Str(Bytes::from_static(b"v")),
                Value::Nil,
            ]
        );
    }

    #[test]
    fn split_frame_across_reads_is_reassembled() {
        let req = request(&[b"set", b"key", b"value"]);
        let (a, b) = req.split_at(5);
        let mut stream = Script::new(vec![a.to_vec(), b.to_vec()]);
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();
        conn.drive(&mut stream, &mut executor);

        assert_eq!(stream.reads, 2);
        assert_eq!(decode_responses(&stream.output), vec![Value::Nil]);
        assert_eq!(conn.state(), ConnState::ReadingRequest);
    }

    #[test]
    fn back_pressure_parks_in_writing_state_until_drained() {
        let mut stream = Script::new(vec![request(&[b"get", b"nope"])]);
        stream.write_quota = 2;
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();

        conn.drive(&mut stream, &mut executor);
        // Partial writes keep making progress until the quota forces a
        // would-block; quota 2 drains 2 bytes per write call.
        assert_eq!(conn.state(), ConnState::ReadingRequest);
        assert_eq!(decode_responses(&stream.output), vec![Value::Nil]);
        assert!(stream.writes > 1, "expected several partial writes");
    }

    #[test]
    fn would_block_write_waits_for_writable() {
        let mut stream = Script::new(vec![request(&[b"get", b"nope"])]);
        stream.write_quota = 0;
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();

        conn.drive(&mut stream, &mut executor);
        assert_eq!(conn.state(), ConnState::WritingResponse);
        assert!(conn.wants_write());
        assert!(stream.output.is_empty());

        // Writable notification arrives.
        stream.write_quota = usize::MAX;
        conn.drive(&mut stream, &mut executor);
        assert_eq!(conn.state(), ConnState::ReadingRequest);
        assert_eq!(decode_responses(&stream.output), vec![Value::Nil]);
    }

    #[test]
    fn clean_eof_with_empty_buffer_closes() {
        let mut stream = Script::new(Vec::new());
        stream.eof_after_input = true;
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();
        conn.drive(&mut stream, &mut executor);
        assert!(conn.is_closing());
    }

    #[test]
    fn eof_mid_frame_closes() {
        let req = request(&[b"get", b"k"]);
        let mut stream = Script::new(vec![req[..3].to_vec()]);
        stream.eof_after_input = true;
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();
        conn.drive(&mut stream, &mut executor);
        assert!(conn.is_closing());
        assert!(stream.output.is_empty());
    }

    #[test]
    fn malformed_frame_closes_without_a_response() {
        let mut req = request(&[b"get", b"k"]);
        // Declare two extra bytes the body does not account for.
        let len = u32::from_le_bytes([req[0], req[1], req[2], req[3]]);
        req[..4].copy_from_slice(&(len + 2).to_le_bytes());
        req.extend_from_slice(b"xx");

        let mut stream = Script::new(vec![req]);
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();
        conn.drive(&mut stream, &mut executor);
        assert!(conn.is_closing());
        assert!(stream.output.is_empty());
    }

    #[test]
    fn oversized_frame_header_closes_immediately() {
        let mut stream = Script::new(vec![8192u32.to_le_bytes().to_vec()]);
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();
        conn.drive(&mut stream, &mut executor);
        assert!(conn.is_closing());
    }

    #[test]
    fn unknown_command_keeps_the_connection_open() {
        let mut stream = Script::new(vec![request(&[b"bogus"])]);
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();
        conn.drive(&mut stream, &mut executor);

        assert_eq!(conn.state(), ConnState::ReadingRequest);
        match decode_responses(&stream.output).as_slice() {
            [Value::Err { code, .. }] => assert_eq!(*code, ERR_UNKNOWN),
            other => panic!("expected one error response, got {other:?}"),
        }
    }

    #[test]
    fn oversized_response_is_replaced_with_too_big() {
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();

        // Three 1500-byte keys push the KEYS listing past one frame.
        let mut frames = Vec::new();
        for fill in [b'a', b'b', b'c'] {
            let key = vec![fill; 1500];
            frames.push(request(&[b"set", &key, b"v"]));
        }
        frames.push(request(&[b"keys"]));
        let mut stream = Script::new(frames);
        conn.drive(&mut stream, &mut executor);

        let responses = decode_responses(&stream.output);
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0], Value::Nil);
        match &responses[3] {
            Value::Err { code, .. } => assert_eq!(*code, ERR_TOO_BIG),
            other => panic!("expected a too-big error, got {other:?}"),
        }
        assert_eq!(conn.state(), ConnState::ReadingRequest);
    }

    #[test]
    fn interrupted_reads_retry_in_place() {
        struct Interrupting {
            inner: Script,
            interruptions: usize,
        }
        impl Read for Interrupting {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.interruptions > 0 {
                    self.interruptions -= 1;
                    return Err(io::Error::from(ErrorKind::Interrupted));
                }
                self.inner.read(buf)
            }
        }
        impl Write for Interrupting {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.inner.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut stream = Interrupting {
            inner: Script::new(vec![request(&[b"get", b"k"])]),
            interruptions: 2,
        };
        let mut conn = Connection::new(16 * 1024);
        let mut executor = CommandExecutor::new();
        conn.drive(&mut stream, &mut executor);
        assert_eq!(decode_responses(&stream.inner.output), vec![Value::Nil]);
    }
}
