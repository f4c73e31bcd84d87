// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Native run-file format (.rundat)
//!
//! # Format Overview
//!
//! ```text
//! +---------------------------------------------------------+
//! |                 File Header (32 bytes)                   |
//! |  Magic (8) | Version (4) | Flags (4) | MsgCount (8) |   |
//! |  Reserved (8)                                            |
//! +---------------------------------------------------------+
//! |                 Record 0                                 |
//! |  timestamp (8) | kind (1) | seq (8) | sender_len (2) |  |
//! |  meta_len (4) | frame_count (2) | sender | meta |       |
//! |  frames [len (4) | bytes]* | CRC32 (4)                  |
//! +---------------------------------------------------------+
//! |                 Record 1 ...                             |
//! +---------------------------------------------------------+
//! ```
//!
//! One record per CDTP message, in arrival order. The meta map is stored as
//! its msgpack wire bytes; payload frame boundaries are preserved exactly.
//! Each record carries a CRC32 over its body so torn tails from a crashed
//! receiver are detected on read.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use constellation::protocol::{pack, CdtpMessage, DataKind, MetaMap};

/// Magic bytes: "CRUNDAT\0"
pub const MAGIC: [u8; 8] = [0x43, 0x52, 0x55, 0x4E, 0x44, 0x41, 0x54, 0x00];

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header size.
pub const HEADER_SIZE: usize = 32;

/// Guard against absurd record fields in corrupted files.
const MAX_RECORD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid run file magic")]
    BadMagic,
    #[error("unsupported format version {0}")]
    BadVersion(u32),
    #[error("record checksum mismatch at offset {0}")]
    BadChecksum(u64),
    #[error("malformed record: {0}")]
    Malformed(String),
}

pub type FormatResult<T> = Result<T, FormatError>;

/// One recorded CDTP message.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp_ns: u64,
    pub kind: DataKind,
    pub seq: u64,
    pub sender: String,
    /// Meta map as msgpack wire bytes (see [`Record::meta`]).
    pub meta_bytes: Vec<u8>,
    pub payload: Vec<Vec<u8>>,
}

impl Record {
    pub fn from_message(msg: &CdtpMessage) -> FormatResult<Self> {
        let mut meta_bytes = Vec::new();
        pack::write_meta(&mut meta_bytes, Some(&msg.meta))
            .map_err(|e| FormatError::Malformed(e.to_string()))?;
        Ok(Record {
            timestamp_ns: msg.timestamp_ns,
            kind: msg.kind,
            seq: msg.seq,
            sender: msg.sender.clone(),
            meta_bytes,
            payload: msg.payload.clone(),
        })
    }

    /// Decode the stored meta map.
    pub fn meta(&self) -> FormatResult<MetaMap> {
        let mut cursor = self.meta_bytes.as_slice();
        pack::read_meta(&mut cursor).map_err(|e| FormatError::Malformed(e.to_string()))
    }

    fn body_bytes(&self) -> FormatResult<Vec<u8>> {
        let mut body = Vec::with_capacity(
            23 + self.sender.len()
                + self.meta_bytes.len()
                + self.payload.iter().map(|f| f.len() + 4).sum::<usize>(),
        );
        body.write_u64::<LittleEndian>(self.timestamp_ns)?;
        body.write_u8(self.kind as u8)?;
        body.write_u64::<LittleEndian>(self.seq)?;
        body.write_u16::<LittleEndian>(
            u16::try_from(self.sender.len())
                .map_err(|_| FormatError::Malformed("sender name too long".into()))?,
        )?;
        body.write_u32::<LittleEndian>(
            u32::try_from(self.meta_bytes.len())
                .map_err(|_| FormatError::Malformed("meta too large".into()))?,
        )?;
        body.write_u16::<LittleEndian>(
            u16::try_from(self.payload.len())
                .map_err(|_| FormatError::Malformed("too many payload frames".into()))?,
        )?;
        body.extend_from_slice(self.sender.as_bytes());
        body.extend_from_slice(&self.meta_bytes);
        for frame in &self.payload {
            body.write_u32::<LittleEndian>(
                u32::try_from(frame.len())
                    .map_err(|_| FormatError::Malformed("payload frame too large".into()))?,
            )?;
            body.extend_from_slice(frame);
        }
        Ok(body)
    }
}

fn data_kind_from_u8(v: u8) -> FormatResult<DataKind> {
    match v {
        0x00 => Ok(DataKind::Dat),
        0x01 => Ok(DataKind::Bor),
        0x02 => Ok(DataKind::Eor),
        other => Err(FormatError::Malformed(format!(
            "invalid message kind {:#04x}",
            other
        ))),
    }
}

/// Streaming writer for a run file.
pub struct RunFileStream {
    writer: BufWriter<File>,
    message_count: u64,
}

impl RunFileStream {
    /// Create a new run file. Fails fast when the path already exists.
    pub fn create(path: &Path) -> FormatResult<Self> {
        let file = File::options().write(true).create_new(true).open(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_u32::<LittleEndian>(0)?; // flags
        writer.write_u64::<LittleEndian>(0)?; // message count, fixed up on finalize
        writer.write_u64::<LittleEndian>(0)?; // reserved
        Ok(RunFileStream {
            writer,
            message_count: 0,
        })
    }

    pub fn append(&mut self, record: &Record) -> FormatResult<()> {
        let body = record.body_bytes()?;
        self.writer.write_all(&body)?;
        self.writer
            .write_u32::<LittleEndian>(crc32fast::hash(&body))?;
        self.message_count += 1;
        Ok(())
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn flush(&mut self) -> FormatResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Patch the message count into the header and flush everything out.
    pub fn finalize(mut self) -> FormatResult<u64> {
        self.writer.flush()?;
        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| FormatError::Io(io::Error::other(e.to_string())))?;
        file.seek(SeekFrom::Start(16))?;
        file.write_u64::<LittleEndian>(self.message_count)?;
        file.sync_all()?;
        Ok(self.message_count)
    }
}

/// Reader over a finished run file.
pub struct RunFile {
    reader: BufReader<File>,
    message_count: u64,
}

impl RunFile {
    pub fn open(path: &Path) -> FormatResult<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(FormatError::BadVersion(version));
        }
        let _flags = reader.read_u32::<LittleEndian>()?;
        let message_count = reader.read_u64::<LittleEndian>()?;
        let _reserved = reader.read_u64::<LittleEndian>()?;
        Ok(RunFile {
            reader,
            message_count,
        })
    }

    /// Message count from the header (0 when the writer died before
    /// finalize; records can still be walked).
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Read the next record, `Ok(None)` at a clean end of file.
    pub fn next_record(&mut self) -> FormatResult<Option<Record>> {
        let offset = self.reader.stream_position()?;
        let timestamp_ns = match self.reader.read_u64::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let kind = data_kind_from_u8(self.reader.read_u8()?)?;
        let seq = self.reader.read_u64::<LittleEndian>()?;
        let sender_len = self.reader.read_u16::<LittleEndian>()? as usize;
        let meta_len = self.reader.read_u32::<LittleEndian>()? as usize;
        let frame_count = self.reader.read_u16::<LittleEndian>()? as usize;
        if sender_len + meta_len > MAX_RECORD_BYTES {
            return Err(FormatError::Malformed("record header out of range".into()));
        }

        let mut sender = vec![0u8; sender_len];
        self.reader.read_exact(&mut sender)?;
        let sender = String::from_utf8(sender)
            .map_err(|_| FormatError::Malformed("sender is not valid utf-8".into()))?;
        let mut meta_bytes = vec![0u8; meta_len];
        self.reader.read_exact(&mut meta_bytes)?;
        let mut payload = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            let len = self.reader.read_u32::<LittleEndian>()? as usize;
            if len > MAX_RECORD_BYTES {
                return Err(FormatError::Malformed("payload frame out of range".into()));
            }
            let mut frame = vec![0u8; len];
            self.reader.read_exact(&mut frame)?;
            payload.push(frame);
        }

        let record = Record {
            timestamp_ns,
            kind,
            seq,
            sender,
            meta_bytes,
            payload,
        };
        let stored_crc = self.reader.read_u32::<LittleEndian>()?;
        let actual_crc = crc32fast::hash(&record.body_bytes()?);
        if stored_crc != actual_crc {
            return Err(FormatError::BadChecksum(offset));
        }
        Ok(Some(record))
    }

    /// Collect every record (small files, tests, inspection).
    pub fn records(&mut self) -> FormatResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation::protocol::Value;

    fn sample_record(kind: DataKind, seq: u64) -> Record {
        let mut meta = MetaMap::new();
        meta.insert("run_id".into(), Value::from("r42"));
        let mut meta_bytes = Vec::new();
        pack::write_meta(&mut meta_bytes, Some(&meta)).unwrap();
        Record {
            timestamp_ns: 1_700_000_000_000_000_000 + seq,
            kind,
            seq,
            sender: "producer".into(),
            meta_bytes,
            payload: vec![vec![seq as u8], Vec::new()],
        }
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.rundat");

        let mut stream = RunFileStream::create(&path).unwrap();
        stream.append(&sample_record(DataKind::Bor, 0)).unwrap();
        stream.append(&sample_record(DataKind::Dat, 1)).unwrap();
        stream.append(&sample_record(DataKind::Eor, 2)).unwrap();
        assert_eq!(stream.finalize().unwrap(), 3);

        let mut file = RunFile::open(&path).unwrap();
        assert_eq!(file.message_count(), 3);
        let records = file.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind, DataKind::Bor);
        assert_eq!(records[1].payload, vec![vec![1u8], Vec::new()]);
        assert_eq!(
            records[2].meta().unwrap().get("run_id"),
            Some(&Value::from("r42"))
        );
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.rundat");
        std::fs::write(&path, b"already here").unwrap();
        assert!(matches!(
            RunFileStream::create(&path),
            Err(FormatError::Io(_))
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.rundat");
        std::fs::write(&path, [0u8; 64]).unwrap();
        assert!(matches!(RunFile::open(&path), Err(FormatError::BadMagic)));
    }

    #[test]
    fn test_corrupted_record_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.rundat");
        let mut stream = RunFileStream::create(&path).unwrap();
        stream.append(&sample_record(DataKind::Bor, 0)).unwrap();
        stream.finalize().unwrap();

        // flip a timestamp byte inside the record body
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 1] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let mut file = RunFile::open(&path).unwrap();
        assert!(matches!(
            file.next_record(),
            Err(FormatError::BadChecksum(_))
        ));
    }
}
