//! Negotiation payload encoding for QR codes and URL fragments.
//!
//! Compressed form: JSON → LZ string, URI-component alphabet (the format
//! browser peers put in `#offer=` / `#answer=` links).
//! Plain form: bare JSON, as scanned from a raw QR code.
//! Gzip + base64 strings from earlier releases are still read.

use crate::error::{Result, SessionError};
use crate::peer::lz::{compress_to_uri, decompress_from_uri};
use crate::peer::types::{Description, NegotiationPayload, PayloadKind};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;

/// Decompressed payloads larger than this are rejected (zip-bomb guard)
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

/// Display name given to links that carry only a session description
pub const UNNAMED_PEER: &str = "peer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Plain,
    Compressed,
}

/// Compressed, URL-safe transport string
pub fn pack(p: &NegotiationPayload) -> Result<String> {
    pack_with(p, Encoding::Compressed)
}

pub fn pack_with(p: &NegotiationPayload, encoding: Encoding) -> Result<String> {
    let json = serde_json::to_string(p).map_err(encode_error)?;
    Ok(match encoding {
        Encoding::Plain => json,
        Encoding::Compressed => compress_to_uri(&json),
    })
}

/// Inverse of [`pack`]; also accepts the plain form
pub fn unpack(s: &str) -> Result<NegotiationPayload> {
    let s = s.trim();
    if s.is_empty() {
        return Err(SessionError::Decode("empty payload".into()));
    }

    let json = if s.starts_with('{') {
        s.as_bytes().to_vec()
    } else {
        match decompress_from_uri(s, MAX_DECOMPRESSED_SIZE as usize) {
            Some(text) if text.starts_with('{') => text.into_bytes(),
            _ => inflate(&decode_base64(s)?)?,
        }
    };
    let payload = parse_payload(&json)?;

    if payload.display_name.trim().is_empty() {
        return Err(SessionError::Decode("payload has no username".into()));
    }
    if payload.description.is_empty() {
        return Err(SessionError::Decode("payload has no session description".into()));
    }
    Ok(payload)
}

/// Not a rescan case
fn encode_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::Negotiation(format!("payload is not serializable: {e}"))
}

fn parse_payload(json: &[u8]) -> Result<NegotiationPayload> {
    let value: Value = serde_json::from_slice(json)
        .map_err(|e| SessionError::Decode(format!("invalid payload JSON: {e}")))?;

    // URL-only clients share the bare `{type, sdp}` description
    let bare = value.get("username").is_none() && value.get("sdp").is_some_and(Value::is_string);
    if bare {
        let kind: PayloadKind = serde_json::from_value(value["type"].clone())
            .map_err(|e| SessionError::Decode(format!("invalid description type: {e}")))?;
        return Ok(NegotiationPayload::new(kind, UNNAMED_PEER, Description(value)));
    }
    serde_json::from_value(value)
        .map_err(|e| SessionError::Decode(format!("invalid payload JSON: {e}")))
}

fn decode_base64(s: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s)
        .or_else(|_| STANDARD.decode(s))
        .map_err(|e| SessionError::Decode(format!("invalid base64: {e}")))
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let gz = GzDecoder::new(compressed);
    let mut json = Vec::new();
    // read one byte past the limit to tell "exactly at limit" from "too big"
    gz.take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut json)
        .map_err(|e| SessionError::Decode(format!("decompression failed: {e}")))?;
    if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(SessionError::Decode(format!(
            "payload exceeds {} bytes when decompressed",
            MAX_DECOMPRESSED_SIZE
        )));
    }
    Ok(json)
}

/// Shareable link: `base` without its fragment, plus `#offer=…` / `#answer=…`
pub fn to_url(base: &str, p: &NegotiationPayload) -> Result<String> {
    let base = base.split('#').next().unwrap_or(base);
    Ok(format!("{}#{}={}", base, p.kind, pack(p)?))
}

/// Extracts the payload from a link produced by [`to_url`]
pub fn from_url(url: &str) -> Result<NegotiationPayload> {
    let (_, fragment) = url
        .split_once('#')
        .ok_or_else(|| SessionError::Decode("link has no fragment".into()))?;
    let (label, encoded) = fragment
        .split_once('=')
        .ok_or_else(|| SessionError::Decode("fragment is not key=value".into()))?;
    let expected = match label {
        "offer" => PayloadKind::Offer,
        "answer" => PayloadKind::Answer,
        other => {
            return Err(SessionError::Decode(format!(
                "unknown fragment key: {other}"
            )))
        }
    };

    let payload = unpack(encoded)?;
    if payload.kind != expected {
        return Err(SessionError::Validation(format!(
            "link is labelled {} but carries an {}",
            expected, payload.kind
        )));
    }
    Ok(payload)
}
