//! Unverified inspection of compact JWTs

use aliri::jwk::{KeyId, KeyIdRef};
use aliri_base64::Base64Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The JOSE header of a token, decoded without verifying the token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<KeyId>,
}

impl DecodedHeader {
    /// Constructs a header from its parts
    pub fn new(alg: impl Into<String>, kid: Option<KeyId>) -> Self {
        Self {
            alg: alg.into(),
            kid,
        }
    }

    /// Decodes the header of a compact JWT
    ///
    /// Returns `None` if the token does not have exactly three segments,
    /// or if the first segment is not a base64url-encoded JSON object
    /// with a string `alg` member.
    pub fn decode(token: &str) -> Option<Self> {
        let segments = Segments::split(token)?;
        let raw = Base64Url::from_encoded(segments.header).ok()?;
        serde_json::from_slice(raw.as_slice()).ok()
    }

    /// The signing algorithm claimed by the token
    pub fn alg(&self) -> &str {
        &self.alg
    }

    /// The key ID claimed by the token, if any
    pub fn kid(&self) -> Option<&KeyIdRef> {
        self.kid.as_deref()
    }
}

/// The decoded but unverified contents of a token
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Peeked {
    /// The JOSE header
    pub header: Map<String, Value>,
    /// The payload, as JSON if it parses as JSON, otherwise as a string
    pub payload: Value,
    /// The signature segment, still base64url-encoded
    pub signature: String,
}

/// Decodes a token without verifying it
///
/// Returns `None` when the token is not a three-segment JWT whose
/// header is a JSON object and whose payload is base64url-encoded UTF-8.
/// No signature, key, or time-window check is made.
pub fn peek(token: &str) -> Option<Peeked> {
    let segments = Segments::split(token)?;

    let header = Base64Url::from_encoded(segments.header).ok()?;
    let header = match serde_json::from_slice(header.as_slice()).ok()? {
        Value::Object(header) => header,
        _ => return None,
    };

    let payload = Base64Url::from_encoded(segments.payload).ok()?;
    let payload = match serde_json::from_slice(payload.as_slice()) {
        Ok(payload) => payload,
        Err(_) => Value::String(String::from_utf8(payload.into_inner()).ok()?),
    };

    Some(Peeked {
        header,
        payload,
        signature: segments.signature.to_owned(),
    })
}

struct Segments<'a> {
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
}

impl<'a> Segments<'a> {
    fn split(token: &'a str) -> Option<Self> {
        let mut parts = token.split('.');
        let header = parts.next()?;
        let payload = parts.next()?;
        let signature = parts.next()?;

        if parts.next().is_some() || header.is_empty() {
            return None;
        }

        Some(Self {
            header,
            payload,
            signature,
        })
    }
}
