use crate::codec::{FromPayload, IntoPayload, PayloadShape};
use crate::error::ProcessingError;
use bytes::Bytes;
use chrono::{DateTime, Utc};

#[test]
fn test_text_decoding() {
  let text = String::from_payload(&Bytes::from_static(b"hello")).unwrap();
  assert_eq!(text, "hello");

  let err = String::from_payload(&Bytes::from_static(&[0xff, 0xfe])).unwrap_err();
  assert!(matches!(
    err,
    ProcessingError::Decode {
      shape: PayloadShape::Text,
      ..
    }
  ));
}

#[test]
fn test_integer_decoding_trims() {
  assert_eq!(i64::from_payload(&Bytes::from_static(b" 42\n")).unwrap(), 42);
  assert!(i64::from_payload(&Bytes::from_static(b"forty-two")).is_err());
  assert_eq!(7i64.into_payload().unwrap(), Bytes::from_static(b"7"));
}

#[test]
fn test_text_list_is_json() {
  let list = Vec::<String>::from_payload(&Bytes::from_static(br#"["0","1","2"]"#)).unwrap();
  assert_eq!(list, vec!["0", "1", "2"]);

  let encoded = vec!["a".to_string(), "b".to_string()].into_payload().unwrap();
  assert_eq!(encoded, Bytes::from_static(br#"["a","b"]"#));
}

#[test]
fn test_timestamp_round_trips_through_json() {
  let instant = DateTime::<Utc>::from_timestamp_millis(12345).unwrap();
  let encoded = instant.into_payload().unwrap();
  assert_eq!(DateTime::<Utc>::from_payload(&encoded).unwrap(), instant);
}

#[test]
fn test_shape_compatibility() {
  assert!(PayloadShape::Bytes.is_compatible_with(PayloadShape::TextList));
  assert!(PayloadShape::Timestamp.is_compatible_with(PayloadShape::Bytes));
  assert!(PayloadShape::Text.is_compatible_with(PayloadShape::Integer));
  assert!(PayloadShape::Text.is_compatible_with(PayloadShape::Text));
  assert!(!PayloadShape::Text.is_compatible_with(PayloadShape::TextList));
  assert!(!PayloadShape::Integer.is_compatible_with(PayloadShape::Timestamp));
}

#[test]
fn test_shape_serde_names() {
  assert_eq!(serde_json::to_string(&PayloadShape::TextList).unwrap(), r#""text-list""#);
  assert_eq!(PayloadShape::TextList.to_string(), "text-list");
}
