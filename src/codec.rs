//! Payload conversions between raw message bytes and function argument types.
//!
//! Units are written against ordinary Rust types (`String`, `Vec<String>`, ...).
//! [`FromPayload`] decodes an incoming payload and [`IntoPayload`] encodes a
//! result. Every decoder declares a [`PayloadShape`] so the binder can reject two
//! units that read the same channel with incompatible expectations.
//!
//! | Type             | Shape      | Encoding                        |
//! |------------------|------------|---------------------------------|
//! | `Bytes`, `Vec<u8>` | `bytes`  | as-is                           |
//! | `String`         | `text`     | UTF-8                           |
//! | `i64`            | `integer`  | UTF-8 decimal                   |
//! | `Vec<String>`    | `text-list`| JSON array of strings           |
//! | `DateTime<Utc>`  | `timestamp`| JSON string (RFC 3339)          |

use crate::error::ProcessingError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// What a decoder expects to find in a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadShape {
  /// Any byte sequence.
  Bytes,
  /// UTF-8 text.
  Text,
  /// A decimal integer in UTF-8.
  Integer,
  /// A JSON array of strings.
  TextList,
  /// A JSON-encoded timestamp.
  Timestamp,
}

impl PayloadShape {
  /// Whether two consumers with these shapes can share one input channel.
  ///
  /// Raw byte consumers accept anything; integers are a subset of text.
  #[must_use]
  pub fn is_compatible_with(self, other: PayloadShape) -> bool {
    use PayloadShape::*;
    matches!(
      (self, other),
      (Bytes, _) | (_, Bytes) | (Text, Integer) | (Integer, Text)
    ) || self == other
  }
}

impl Display for PayloadShape {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    let name = match self {
      PayloadShape::Bytes => "bytes",
      PayloadShape::Text => "text",
      PayloadShape::Integer => "integer",
      PayloadShape::TextList => "text-list",
      PayloadShape::Timestamp => "timestamp",
    };
    f.write_str(name)
  }
}

/// Decode a function argument from a message payload.
pub trait FromPayload: Sized {
  /// Shape this decoder expects.
  const SHAPE: PayloadShape;

  /// Decode `payload`.
  fn from_payload(payload: &Bytes) -> Result<Self, ProcessingError>;
}

/// Encode a function result as a message payload.
pub trait IntoPayload {
  /// Encode `self`.
  fn into_payload(self) -> Result<Bytes, ProcessingError>;
}

fn decode_error(shape: PayloadShape, reason: impl Display) -> ProcessingError {
  ProcessingError::Decode {
    shape,
    reason: reason.to_string(),
  }
}

impl FromPayload for Bytes {
  const SHAPE: PayloadShape = PayloadShape::Bytes;

  fn from_payload(payload: &Bytes) -> Result<Self, ProcessingError> {
    Ok(payload.clone())
  }
}

impl FromPayload for Vec<u8> {
  const SHAPE: PayloadShape = PayloadShape::Bytes;

  fn from_payload(payload: &Bytes) -> Result<Self, ProcessingError> {
    Ok(payload.to_vec())
  }
}

impl FromPayload for String {
  const SHAPE: PayloadShape = PayloadShape::Text;

  fn from_payload(payload: &Bytes) -> Result<Self, ProcessingError> {
    String::from_utf8(payload.to_vec()).map_err(|e| decode_error(Self::SHAPE, e))
  }
}

impl FromPayload for i64 {
  const SHAPE: PayloadShape = PayloadShape::Integer;

  fn from_payload(payload: &Bytes) -> Result<Self, ProcessingError> {
    let text = std::str::from_utf8(payload).map_err(|e| decode_error(Self::SHAPE, e))?;
    text
      .trim()
      .parse()
      .map_err(|e| decode_error(Self::SHAPE, e))
  }
}

impl FromPayload for Vec<String> {
  const SHAPE: PayloadShape = PayloadShape::TextList;

  fn from_payload(payload: &Bytes) -> Result<Self, ProcessingError> {
    serde_json::from_slice(payload).map_err(|e| decode_error(Self::SHAPE, e))
  }
}

impl FromPayload for DateTime<Utc> {
  const SHAPE: PayloadShape = PayloadShape::Timestamp;

  fn from_payload(payload: &Bytes) -> Result<Self, ProcessingError> {
    serde_json::from_slice(payload).map_err(|e| decode_error(Self::SHAPE, e))
  }
}

impl IntoPayload for Bytes {
  fn into_payload(self) -> Result<Bytes, ProcessingError> {
    Ok(self)
  }
}

impl IntoPayload for Vec<u8> {
  fn into_payload(self) -> Result<Bytes, ProcessingError> {
    Ok(Bytes::from(self))
  }
}

impl IntoPayload for String {
  fn into_payload(self) -> Result<Bytes, ProcessingError> {
    Ok(Bytes::from(self))
  }
}

impl IntoPayload for &'static str {
  fn into_payload(self) -> Result<Bytes, ProcessingError> {
    Ok(Bytes::from_static(self.as_bytes()))
  }
}

impl IntoPayload for i64 {
  fn into_payload(self) -> Result<Bytes, ProcessingError> {
    Ok(Bytes::from(self.to_string()))
  }
}

impl IntoPayload for Vec<String> {
  fn into_payload(self) -> Result<Bytes, ProcessingError> {
    serde_json::to_vec(&self)
      .map(Bytes::from)
      .map_err(|e| ProcessingError::Encode(e.to_string()))
  }
}

impl IntoPayload for DateTime<Utc> {
  fn into_payload(self) -> Result<Bytes, ProcessingError> {
    serde_json::to_vec(&self)
      .map(Bytes::from)
      .map_err(|e| ProcessingError::Encode(e.to_string()))
  }
}
