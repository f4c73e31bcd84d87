// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing with multipart accumulation.
//!
//! TCP is a stream without message boundaries; each frame is delimited by a
//! 5-byte header (32-bit big-endian payload length, one flag byte). Flag bit
//! 0 (`MORE`) marks a frame continued by the next frame of the same message,
//! so a multi-frame message is a maximal run of MORE-flagged frames plus one
//! terminating unflagged frame. Writers emit all frames of a message in one
//! call, which keeps messages atomic from the receiver's point of view.
//!
//! [`MessageDecoder`] keeps partial read state across calls, so it works
//! both on blocking sockets with read timeouts and on non-blocking sockets
//! driven by a readiness poller.

use std::io::{self, Read, Write};

/// Frame header size: 4 length bytes plus 1 flag byte.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Flag bit 0: this frame is continued by the next one.
pub const FLAG_MORE: u8 = 0x01;

/// Default maximum frame size (16 MiB, anti-OOM guard).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Write one complete message (all frames, MORE flags applied) to `w`.
pub fn write_message<W: Write>(w: &mut W, frames: &[&[u8]]) -> io::Result<()> {
    debug_assert!(!frames.is_empty(), "a message has at least one frame");
    let last = frames.len() - 1;
    for (i, frame) in frames.iter().enumerate() {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header[0..4].copy_from_slice(&(frame.len() as u32).to_be_bytes());
        header[4] = if i < last { FLAG_MORE } else { 0 };
        w.write_all(&header)?;
        w.write_all(frame)?;
    }
    w.flush()
}

/// Serialise a message into one contiguous buffer (used where a single
/// write call must cover the whole message).
pub fn encode_message(frames: &[&[u8]]) -> Vec<u8> {
    let total: usize = frames
        .iter()
        .map(|f| f.len() + FRAME_HEADER_SIZE)
        .sum();
    let mut buf = Vec::with_capacity(total);
    // write_message on a Vec cannot fail
    write_message(&mut buf, frames).expect("in-memory write");
    buf
}

#[derive(Debug)]
enum ReadState {
    Header {
        bytes_read: usize,
        header: [u8; FRAME_HEADER_SIZE],
    },
    Body {
        expected: usize,
        more: bool,
        bytes_read: usize,
    },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Header {
            bytes_read: 0,
            header: [0u8; FRAME_HEADER_SIZE],
        }
    }
}

/// Incremental decoder for framed multipart messages.
#[derive(Debug)]
pub struct MessageDecoder {
    state: ReadState,
    buffer: Vec<u8>,
    frames: Vec<Vec<u8>>,
    max_size: usize,
    messages_decoded: u64,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl MessageDecoder {
    pub fn new(max_size: usize) -> Self {
        MessageDecoder {
            state: ReadState::default(),
            buffer: Vec::new(),
            frames: Vec::new(),
            max_size,
            messages_decoded: 0,
        }
    }

    /// Total complete messages decoded so far.
    pub fn messages_decoded(&self) -> u64 {
        self.messages_decoded
    }

    /// Drop any partially accumulated message (after a reconnect).
    pub fn reset(&mut self) {
        self.state = ReadState::default();
        self.buffer.clear();
        self.frames.clear();
    }

    /// Pull bytes from `r` until a complete message is assembled, no more
    /// data is available, or the peer closes.
    ///
    /// Returns `Ok(Some(frames))` for a complete message, `Ok(None)` when
    /// the read would block or timed out mid-message (state is kept for the
    /// next call), and `Err` on peer close (`UnexpectedEof`) or violation of
    /// the frame-size cap (`InvalidData`).
    pub fn decode_from<R: Read>(&mut self, r: &mut R) -> io::Result<Option<Vec<Vec<u8>>>> {
        loop {
            match self.state {
                ReadState::Header {
                    ref mut bytes_read,
                    ref mut header,
                } => {
                    while *bytes_read < FRAME_HEADER_SIZE {
                        match r.read(&mut header[*bytes_read..]) {
                            Ok(0) => {
                                return Err(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    "peer closed mid-frame",
                                ))
                            }
                            Ok(n) => *bytes_read += n,
                            Err(e) => return map_read_err(e),
                        }
                    }
                    let len =
                        u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
                    let more = header[4] & FLAG_MORE != 0;
                    if len > self.max_size {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("frame of {} bytes exceeds cap of {}", len, self.max_size),
                        ));
                    }
                    self.buffer = vec![0u8; len];
                    self.state = ReadState::Body {
                        expected: len,
                        more,
                        bytes_read: 0,
                    };
                }
                ReadState::Body {
                    expected,
                    more,
                    ref mut bytes_read,
                } => {
                    while *bytes_read < expected {
                        match r.read(&mut self.buffer[*bytes_read..]) {
                            Ok(0) => {
                                return Err(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    "peer closed mid-frame",
                                ))
                            }
                            Ok(n) => *bytes_read += n,
                            Err(e) => return map_read_err(e),
                        }
                    }
                    self.frames.push(std::mem::take(&mut self.buffer));
                    self.state = ReadState::default();
                    if !more {
                        self.messages_decoded += 1;
                        return Ok(Some(std::mem::take(&mut self.frames)));
                    }
                }
            }
        }
    }
}

/// WouldBlock/TimedOut (and NotConnected during a non-blocking connect)
/// mean "no data yet"; everything else is a real failure.
fn map_read_err(e: io::Error) -> io::Result<Option<Vec<Vec<u8>>>> {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::NotConnected => {
            Ok(None)
        }
        io::ErrorKind::Interrupted => Ok(None),
        _ => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_single_frame_round_trip() {
        let buf = encode_message(&[b"hello"]);
        let mut decoder = MessageDecoder::default();
        let msg = decoder
            .decode_from(&mut Cursor::new(buf))
            .unwrap()
            .unwrap();
        assert_eq!(msg, vec![b"hello".to_vec()]);
        assert_eq!(decoder.messages_decoded(), 1);
    }

    #[test]
    fn test_multipart_is_one_message() {
        let buf = encode_message(&[b"topic", b"header", b""]);
        let mut decoder = MessageDecoder::default();
        let msg = decoder
            .decode_from(&mut Cursor::new(buf))
            .unwrap()
            .unwrap();
        assert_eq!(msg.len(), 3);
        assert_eq!(msg[0], b"topic".to_vec());
        assert_eq!(msg[2], Vec::<u8>::new());
    }

    #[test]
    fn test_two_messages_back_to_back() {
        let mut buf = encode_message(&[b"a", b"b"]);
        buf.extend_from_slice(&encode_message(&[b"c"]));
        let mut cursor = Cursor::new(buf);
        let mut decoder = MessageDecoder::default();
        assert_eq!(
            decoder.decode_from(&mut cursor).unwrap().unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(
            decoder.decode_from(&mut cursor).unwrap().unwrap(),
            vec![b"c".to_vec()]
        );
    }

    /// Reader that yields one byte per call, to exercise partial reads.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.data.len() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "drained"));
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn test_partial_reads_keep_state() {
        let data = encode_message(&[b"slow", b"path"]);
        let total = data.len();
        let mut trickle = Trickle { data, pos: 0 };
        let mut decoder = MessageDecoder::default();
        let mut result = None;
        for _ in 0..=total {
            match decoder.decode_from(&mut trickle).unwrap() {
                Some(msg) => {
                    result = Some(msg);
                    break;
                }
                None => continue,
            }
        }
        assert_eq!(
            result.unwrap(),
            vec![b"slow".to_vec(), b"path".to_vec()]
        );
    }

    #[test]
    fn test_peer_close_is_error() {
        let buf = encode_message(&[b"partial"]);
        let mut cursor = Cursor::new(buf[..4].to_vec());
        let mut decoder = MessageDecoder::default();
        let err = decoder.decode_from(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = MessageDecoder::new(16);
        let buf = encode_message(&[b"this frame is longer than sixteen bytes"]);
        let err = decoder.decode_from(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_random_frame_sizes_round_trip() {
        let frames: Vec<Vec<u8>> = (0..8)
            .map(|_| {
                let len = fastrand::usize(0..4096);
                (0..len).map(|_| fastrand::u8(..)).collect()
            })
            .collect();
        let borrowed: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
        let buf = encode_message(&borrowed);
        let mut decoder = MessageDecoder::default();
        let msg = decoder
            .decode_from(&mut Cursor::new(buf))
            .unwrap()
            .unwrap();
        assert_eq!(msg, frames);
    }

    #[test]
    fn test_empty_frame_allowed() {
        let buf = encode_message(&[b""]);
        let mut decoder = MessageDecoder::default();
        let msg = decoder
            .decode_from(&mut Cursor::new(buf))
            .unwrap()
            .unwrap();
        assert_eq!(msg, vec![Vec::<u8>::new()]);
    }
}
