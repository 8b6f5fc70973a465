// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payload column encoding.
//!
//! Rows written by the store hold a JSON envelope of the payload and its
//! context, optionally zlib-compressed. Rows written by other producers hold
//! raw bytes or text.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use msgstore_core::{Payload, StoreError};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    payload: Payload,
    #[serde(default)]
    context: BTreeMap<String, String>,
}

/// Decoded content of a payload column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub payload: Payload,
    pub context: BTreeMap<String, String>,
}

pub fn encode(
    payload: &Payload,
    context: &BTreeMap<String, String>,
    compress: bool,
) -> Result<Vec<u8>, StoreError> {
    let envelope = Envelope {
        payload: payload.clone(),
        context: context.clone(),
    };
    let json = serde_json::to_vec(&envelope)
        .map_err(|e| StoreError::Codec(format!("cannot serialize payload: {e}")))?;
    if !compress {
        return Ok(json);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map_err(|e| StoreError::Codec(format!("cannot compress payload: {e}")))
}

/// Decodes an envelope, trying the configured form first and the other form once.
pub fn decode(bytes: &[u8], compressed_first: bool) -> Result<Decoded, StoreError> {
    let first = decode_as(bytes, compressed_first);
    match first {
        Ok(decoded) => Ok(decoded),
        Err(first_err) => {
            warn!(
                compressed = compressed_first,
                error = %first_err,
                "could not decode payload, retrying with the other compression setting"
            );
            decode_as(bytes, !compressed_first).map_err(|second_err| {
                StoreError::Codec(format!(
                    "payload is neither a compressed nor a plain envelope: {first_err}; {second_err}"
                ))
            })
        }
    }
}

fn decode_as(bytes: &[u8], compressed: bool) -> Result<Decoded, String> {
    let json = if compressed {
        inflate(bytes).map_err(|e| format!("inflate failed: {e}"))?
    } else {
        bytes.to_vec()
    };
    let envelope: Envelope =
        serde_json::from_slice(&json).map_err(|e| format!("invalid envelope: {e}"))?;
    Ok(Decoded {
        payload: envelope.payload,
        context: envelope.context,
    })
}

/// Bytes for a raw blob column, compressed when asked.
pub fn encode_raw(payload: &Payload, compress: bool) -> Result<Vec<u8>, StoreError> {
    let bytes = match payload {
        Payload::Text(text) => text.as_bytes().to_vec(),
        Payload::Bytes(bytes) => bytes.clone(),
    };
    if !compress {
        return Ok(bytes);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| StoreError::Codec(format!("cannot compress payload: {e}")))
}

/// Reads a blob written by another producer: inflated when it is zlib data, as-is otherwise.
pub fn decode_raw(bytes: &[u8], compressed: bool) -> Payload {
    if compressed && let Ok(inflated) = inflate(bytes) {
        return Payload::Bytes(inflated);
    }
    Payload::Bytes(bytes.to_vec())
}

fn inflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}
