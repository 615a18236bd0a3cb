//! Length-framed, versioned binary wire protocol.
//!
//! Every frame starts with the same envelope: magic, protocol version, message
//! kind, sender rank, payload count, and the sender's sub-region origin offset
//! (needed because the processed cube may itself be a subsection of a larger
//! parent image). Detections follow as length-prefixed binary records.
//! Deserialization rejects any envelope whose version does not match
//! [`PROTOCOL_VERSION`]; a mismatch is fatal, never silently tolerated.

use serde::{de::DeserializeOwned, Serialize};

use crate::detection::Detection;
use crate::domain::Rank;
use crate::error::SearchError;
use crate::stats::{GlobalThreshold, StatsPartial};

/// Protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u16 = 1;

const MAGIC: u32 = 0x4355_4245; // "CUBE"

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Worker → coordinator partial statistics.
    StatsPartial,
    /// Coordinator → workers threshold broadcast.
    ThresholdBroadcast,
    /// Worker → coordinator edge-detection list.
    DetectionList,
}

impl MessageKind {
    fn as_u8(self) -> u8 {
        match self {
            MessageKind::StatsPartial => 0,
            MessageKind::ThresholdBroadcast => 1,
            MessageKind::DetectionList => 2,
        }
    }

    fn from_u8(raw: u8) -> Result<Self, SearchError> {
        match raw {
            0 => Ok(MessageKind::StatsPartial),
            1 => Ok(MessageKind::ThresholdBroadcast),
            2 => Ok(MessageKind::DetectionList),
            other => Err(SearchError::Protocol(format!(
                "unknown message kind {other}"
            ))),
        }
    }
}

/// Decoded envelope header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub rank: Rank,
    pub count: u32,
    /// Sender sub-region origin, one entry per axis.
    pub origin: Vec<i64>,
}

fn bincode_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SearchError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| SearchError::Protocol(format!("payload encoding failed: {e}")))
}

fn bincode_decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SearchError> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| SearchError::Protocol(format!("payload decoding failed: {e}")))?;
    if read != bytes.len() {
        return Err(SearchError::Protocol(format!(
            "payload has {} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(value)
}

fn write_envelope(buf: &mut Vec<u8>, kind: MessageKind, rank: Rank, count: u32, origin: &[i64]) {
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    buf.push(kind.as_u8());
    buf.extend_from_slice(&rank.0.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    buf.extend_from_slice(&(origin.len() as u16).to_le_bytes());
    for &o in origin {
        buf.extend_from_slice(&o.to_le_bytes());
    }
}

/// Bounds-checked reader over a received frame.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SearchError> {
        if self.pos + n > self.buf.len() {
            return Err(SearchError::Protocol(format!(
                "truncated frame: wanted {n} bytes at offset {}, frame is {} bytes",
                self.pos,
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SearchError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SearchError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, SearchError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64, SearchError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    fn finish(&self) -> Result<(), SearchError> {
        if self.pos != self.buf.len() {
            return Err(SearchError::Protocol(format!(
                "frame has {} trailing bytes",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn read_envelope(cursor: &mut Cursor<'_>) -> Result<Envelope, SearchError> {
    let magic = cursor.u32()?;
    if magic != MAGIC {
        return Err(SearchError::Protocol(format!(
            "bad magic 0x{magic:08x}"
        )));
    }
    let version = cursor.u16()?;
    if version != PROTOCOL_VERSION {
        return Err(SearchError::ProtocolVersion {
            found: version,
            expected: PROTOCOL_VERSION,
        });
    }
    let kind = MessageKind::from_u8(cursor.u8()?)?;
    let rank = Rank(cursor.u16()?);
    let count = cursor.u32()?;
    let ndim = cursor.u16()? as usize;
    let mut origin = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        origin.push(cursor.i64()?);
    }
    Ok(Envelope {
        kind,
        rank,
        count,
        origin,
    })
}

fn expect_kind(envelope: &Envelope, kind: MessageKind) -> Result<(), SearchError> {
    if envelope.kind != kind {
        return Err(SearchError::Protocol(format!(
            "expected {kind:?} frame from {}, got {:?}",
            envelope.rank, envelope.kind
        )));
    }
    Ok(())
}

/// Encode a worker's edge-detection list.
pub fn encode_detections(
    rank: Rank,
    origin: &[i64],
    detections: &[Detection],
) -> Result<Vec<u8>, SearchError> {
    let mut buf = Vec::new();
    write_envelope(
        &mut buf,
        MessageKind::DetectionList,
        rank,
        detections.len() as u32,
        origin,
    );
    for det in detections {
        let body = bincode_encode(det)?;
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
    }
    Ok(buf)
}

/// Decode a detection-list frame.
pub fn decode_detections(frame: &[u8]) -> Result<(Envelope, Vec<Detection>), SearchError> {
    let mut cursor = Cursor::new(frame);
    let envelope = read_envelope(&mut cursor)?;
    expect_kind(&envelope, MessageKind::DetectionList)?;
    let mut detections = Vec::with_capacity(envelope.count as usize);
    for _ in 0..envelope.count {
        let len = cursor.u32()? as usize;
        let body = cursor.take(len)?;
        detections.push(bincode_decode::<Detection>(body)?);
    }
    cursor.finish()?;
    Ok((envelope, detections))
}

/// Encode a worker's partial statistics.
pub fn encode_stats(
    rank: Rank,
    origin: &[i64],
    partial: &StatsPartial,
) -> Result<Vec<u8>, SearchError> {
    let mut buf = Vec::new();
    write_envelope(&mut buf, MessageKind::StatsPartial, rank, 1, origin);
    let body = bincode_encode(partial)?;
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decode a partial-statistics frame.
pub fn decode_stats(frame: &[u8]) -> Result<(Envelope, StatsPartial), SearchError> {
    let mut cursor = Cursor::new(frame);
    let envelope = read_envelope(&mut cursor)?;
    expect_kind(&envelope, MessageKind::StatsPartial)?;
    let body = cursor.take(frame.len() - cursor.pos)?;
    let partial = bincode_decode::<StatsPartial>(body)?;
    Ok((envelope, partial))
}

/// Encode the coordinator's threshold broadcast.
pub fn encode_threshold(
    rank: Rank,
    threshold: &GlobalThreshold,
) -> Result<Vec<u8>, SearchError> {
    let mut buf = Vec::new();
    write_envelope(&mut buf, MessageKind::ThresholdBroadcast, rank, 1, &[]);
    let body = bincode_encode(threshold)?;
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decode a threshold broadcast frame.
pub fn decode_threshold(frame: &[u8]) -> Result<(Envelope, GlobalThreshold), SearchError> {
    let mut cursor = Cursor::new(frame);
    let envelope = read_envelope(&mut cursor)?;
    expect_kind(&envelope, MessageKind::ThresholdBroadcast)?;
    let body = cursor.take(frame.len() - cursor.pos)?;
    let threshold = bincode_decode::<GlobalThreshold>(body)?;
    Ok((envelope, threshold))
}
