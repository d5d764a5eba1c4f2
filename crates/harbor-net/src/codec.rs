//! Frame encoding.
//!
//! A frame is `[codec: u8][len: u32 BE][payload]`. The codec byte selects
//! how `payload` encodes a [`HarborMessage`]:
//!
//! - `0` [`WireCodec::Json`]: plain structured text (serde_json)
//! - `1` [`WireCodec::Postcard`]: compact binary (postcard)
//!
//! A responder answers in the codec the request arrived in.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NetError;
use crate::message::HarborMessage;

/// Maximum payload size: 64 MiB.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Length of the `[codec][len]` header.
pub const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireCodec {
    Json,
    #[default]
    Postcard,
}

impl WireCodec {
    pub fn tag(self) -> u8 {
        match self {
            Self::Json => 0,
            Self::Postcard => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, NetError> {
        match tag {
            0 => Ok(Self::Json),
            1 => Ok(Self::Postcard),
            other => Err(NetError::Serialization(format!(
                "unknown codec tag {other}"
            ))),
        }
    }

    /// Serialize a message to a bare payload.
    pub fn encode(self, msg: &HarborMessage) -> Result<Vec<u8>, NetError> {
        match self {
            Self::Json => {
                serde_json::to_vec(msg).map_err(|e| NetError::Serialization(e.to_string()))
            }
            Self::Postcard => {
                postcard::to_allocvec(msg).map_err(|e| NetError::Serialization(e.to_string()))
            }
        }
    }

    /// Deserialize a bare payload.
    pub fn decode(self, payload: &[u8]) -> Result<HarborMessage, NetError> {
        match self {
            Self::Json => {
                serde_json::from_slice(payload).map_err(|e| NetError::Serialization(e.to_string()))
            }
            Self::Postcard => {
                postcard::from_bytes(payload).map_err(|e| NetError::Serialization(e.to_string()))
            }
        }
    }
}

impl fmt::Display for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Postcard => f.write_str("postcard"),
        }
    }
}

impl std::str::FromStr for WireCodec {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "postcard" => Ok(Self::Postcard),
            other => Err(NetError::Serialization(format!("unknown codec {other:?}"))),
        }
    }
}

/// Build a complete frame for `msg`.
pub fn encode_frame(codec: WireCodec, msg: &HarborMessage) -> Result<Vec<u8>, NetError> {
    let payload = codec.encode(msg)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(codec.tag());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Parse a frame header into its codec and payload length.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(WireCodec, usize), NetError> {
    let codec = WireCodec::from_tag(header[0])?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(len));
    }
    Ok((codec, len))
}

/// Decode a complete frame held in memory.
pub fn decode_frame(frame: &[u8]) -> Result<(WireCodec, HarborMessage), NetError> {
    let header: &[u8; HEADER_LEN] = frame
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| NetError::Serialization("truncated frame header".into()))?;
    let (codec, len) = decode_header(header)?;
    let payload = &frame[HEADER_LEN..];
    if payload.len() != len {
        return Err(NetError::Serialization(format!(
            "frame declares {len} bytes, carries {}",
            payload.len()
        )));
    }
    Ok((codec, codec.decode(payload)?))
}
