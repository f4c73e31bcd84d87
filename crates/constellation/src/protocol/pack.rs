// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! msgpack primitives shared by all envelope codecs.
//!
//! Header frames are a concatenation of top-level msgpack values (not
//! wrapped in an array), so decoding walks a cursor over the frame and pulls
//! typed values one at a time. Timestamps use the msgpack timestamp
//! extension (type -1); encoding always emits the 96-bit form (nanoseconds
//! `u32` + seconds `i64`, big-endian), decoding accepts all three standard
//! widths.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

pub use rmpv::Value;

/// String-keyed map of arbitrary msgpack values, used for every `meta`
/// field in the envelope.
pub type MetaMap = BTreeMap<String, Value>;

/// Wallclock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Append one msgpack value to `buf`.
pub fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    rmpv::encode::write_value(buf, value)
        .map_err(|e| Error::protocol(format!("value encode failed: {}", e)))
}

/// Append a string value to `buf`.
pub fn write_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    rmp::encode::write_str(buf, s).map_err(|e| Error::protocol(format!("str encode failed: {}", e)))
}

/// Append an unsigned integer value to `buf`.
pub fn write_uint(buf: &mut Vec<u8>, v: u64) -> Result<()> {
    rmp::encode::write_uint(buf, v)
        .map_err(|e| Error::protocol(format!("uint encode failed: {}", e)))?;
    Ok(())
}

/// Append a timestamp extension value (96-bit form) to `buf`.
pub fn write_timestamp(buf: &mut Vec<u8>, nanos: u64) -> Result<()> {
    let secs = (nanos / 1_000_000_000) as i64;
    let sub = (nanos % 1_000_000_000) as u32;
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&sub.to_be_bytes());
    data.extend_from_slice(&secs.to_be_bytes());
    write_value(buf, &Value::Ext(-1, data))
}

/// Append a string-keyed meta map to `buf`. `None` encodes as the empty map.
pub fn write_meta(buf: &mut Vec<u8>, meta: Option<&MetaMap>) -> Result<()> {
    let entries: Vec<(Value, Value)> = meta
        .map(|m| {
            m.iter()
                .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    write_value(buf, &Value::Map(entries))
}

/// Read the next msgpack value off the cursor.
pub fn read_value(cursor: &mut &[u8]) -> Result<Value> {
    rmpv::decode::read_value(cursor)
        .map_err(|e| Error::protocol(format!("value decode failed: {}", e)))
}

/// Read the next value and require a string.
pub fn read_str(cursor: &mut &[u8]) -> Result<String> {
    match read_value(cursor)? {
        Value::String(s) => s
            .into_str()
            .ok_or_else(|| Error::protocol("string value is not valid utf-8")),
        other => Err(Error::protocol(format!("expected string, got {}", other))),
    }
}

/// Read the next value and require an unsigned integer.
pub fn read_uint(cursor: &mut &[u8]) -> Result<u64> {
    match read_value(cursor)? {
        Value::Integer(i) => i
            .as_u64()
            .ok_or_else(|| Error::protocol("negative value where unsigned expected")),
        other => Err(Error::protocol(format!("expected integer, got {}", other))),
    }
}

/// Read the next value and require a timestamp extension, returned as
/// nanoseconds since the Unix epoch.
pub fn read_timestamp(cursor: &mut &[u8]) -> Result<u64> {
    match read_value(cursor)? {
        Value::Ext(-1, data) => decode_timestamp(&data),
        Value::Ext(code, _) => Err(Error::protocol(format!(
            "expected timestamp ext -1, got ext {}",
            code
        ))),
        other => Err(Error::protocol(format!("expected timestamp, got {}", other))),
    }
}

fn decode_timestamp(data: &[u8]) -> Result<u64> {
    match data.len() {
        // timestamp32: seconds only
        4 => {
            let secs = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
            Ok(secs * 1_000_000_000)
        }
        // timestamp64: 30-bit nanos | 34-bit seconds
        8 => {
            let raw = u64::from_be_bytes(data.try_into().expect("length checked"));
            let nanos = raw >> 34;
            let secs = raw & 0x3_FFFF_FFFF;
            Ok(secs * 1_000_000_000 + nanos)
        }
        // timestamp96: u32 nanos + i64 seconds
        12 => {
            let nanos = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
            let secs = i64::from_be_bytes(data[4..12].try_into().expect("length checked"));
            if secs < 0 {
                return Err(Error::protocol("timestamp before the epoch"));
            }
            Ok(secs as u64 * 1_000_000_000 + nanos)
        }
        n => Err(Error::protocol(format!("timestamp ext of {} bytes", n))),
    }
}

/// Read the next value and require a string-keyed map. `nil` is accepted and
/// yields the empty map.
pub fn read_meta(cursor: &mut &[u8]) -> Result<MetaMap> {
    match read_value(cursor)? {
        Value::Nil => Ok(MetaMap::new()),
        Value::Map(entries) => {
            let mut meta = MetaMap::new();
            for (k, v) in entries {
                match k {
                    Value::String(s) => {
                        let key = s
                            .into_str()
                            .ok_or_else(|| Error::protocol("meta key is not valid utf-8"))?;
                        meta.insert(key, v);
                    }
                    other => {
                        return Err(Error::protocol(format!(
                            "meta key must be a string, got {}",
                            other
                        )))
                    }
                }
            }
            Ok(meta)
        }
        other => Err(Error::protocol(format!("expected meta map, got {}", other))),
    }
}

/// Encode a standalone value into its own buffer (payload frames).
pub fn pack_value(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_value(&mut buf, value)?;
    Ok(buf)
}

/// Decode a standalone value from a payload frame, requiring the frame to be
/// fully consumed.
pub fn unpack_value(frame: &[u8]) -> Result<Value> {
    let mut cursor = frame;
    let value = read_value(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(Error::protocol(format!(
            "{} trailing bytes after payload value",
            cursor.len()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_uint_round_trip() {
        let mut buf = Vec::new();
        write_str(&mut buf, "sat_a").unwrap();
        write_uint(&mut buf, 42).unwrap();
        let mut cursor = buf.as_slice();
        assert_eq!(read_str(&mut cursor).unwrap(), "sat_a");
        assert_eq!(read_uint(&mut cursor).unwrap(), 42);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_timestamp_round_trip_96() {
        let ns = 1_700_000_000_123_456_789u64;
        let mut buf = Vec::new();
        write_timestamp(&mut buf, ns).unwrap();
        let mut cursor = buf.as_slice();
        assert_eq!(read_timestamp(&mut cursor).unwrap(), ns);
    }

    #[test]
    fn test_timestamp_accepts_narrow_forms() {
        // timestamp32
        let mut buf = Vec::new();
        write_value(&mut buf, &Value::Ext(-1, 1_700_000_000u32.to_be_bytes().to_vec())).unwrap();
        let mut cursor = buf.as_slice();
        assert_eq!(
            read_timestamp(&mut cursor).unwrap(),
            1_700_000_000u64 * 1_000_000_000
        );

        // timestamp64
        let raw = (500u64 << 34) | 1_700_000_000u64;
        let mut buf = Vec::new();
        write_value(&mut buf, &Value::Ext(-1, raw.to_be_bytes().to_vec())).unwrap();
        let mut cursor = buf.as_slice();
        assert_eq!(
            read_timestamp(&mut cursor).unwrap(),
            1_700_000_000u64 * 1_000_000_000 + 500
        );
    }

    #[test]
    fn test_meta_round_trip() {
        let mut meta = MetaMap::new();
        meta.insert("run_id".into(), Value::from("r1"));
        meta.insert("count".into(), Value::from(3u64));
        let mut buf = Vec::new();
        write_meta(&mut buf, Some(&meta)).unwrap();
        let mut cursor = buf.as_slice();
        let decoded = read_meta(&mut cursor).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_meta_nil_is_empty() {
        let mut buf = Vec::new();
        write_value(&mut buf, &Value::Nil).unwrap();
        let mut cursor = buf.as_slice();
        assert!(read_meta(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn test_type_mismatch_is_protocol_error() {
        let mut buf = Vec::new();
        write_uint(&mut buf, 7).unwrap();
        let mut cursor = buf.as_slice();
        assert!(matches!(
            read_str(&mut cursor),
            Err(crate::Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_unpack_rejects_trailing_bytes() {
        let mut buf = pack_value(&Value::from(1u64)).unwrap();
        buf.push(0x00);
        assert!(unpack_value(&buf).is_err());
    }
}
