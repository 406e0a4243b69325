use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::{Uuid, uuid};

/// Upper bound a listener should accept for one wire line before dropping
/// the connection. The codec itself never assumes a maximum.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Fixed service identity both ends must agree on. Matches the UUID and
/// record name used by the existing ClipSync counterparts.
pub const SERVICE_UUID: Uuid = uuid!("8ce255c0-200a-11e0-ac64-0800200c9a66");
pub const SERVICE_NAME: &str = "ClipSync";

/// Opaque transport address of a remote endpoint.
pub type PeerAddress = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub uuid: Uuid,
    pub name: String,
}

impl ServiceIdentity {
    #[must_use]
    pub fn clipsync() -> Self {
        Self {
            uuid: SERVICE_UUID,
            name: SERVICE_NAME.to_owned(),
        }
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self::clipsync()
    }
}

/// One clipboard broadcast. Serialized as a single JSON object per line,
/// newline-terminated, with exactly the keys `clip` and `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipMessage {
    pub clip: String,
    #[serde(rename = "timestamp", default, with = "timestamp_millis")]
    pub timestamp_unix_ms: u64,
}

impl ClipMessage {
    #[must_use]
    pub fn new(clip: impl Into<String>, timestamp_unix_ms: u64) -> Self {
        Self {
            clip: clip.into(),
            timestamp_unix_ms,
        }
    }
}

/// The counterparts put the timestamp on the wire as a decimal string.
/// The field is advisory and never validated, so an unparseable value
/// decodes as zero instead of failing the whole message.
mod timestamp_millis {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.trim().parse().unwrap_or(0))
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed clip message: {0}")]
    MalformedMessage(String),
    #[error("clip message serialization failed: {0}")]
    Serialization(String),
    #[error("clip line of {got} bytes exceeds the {limit} byte cap")]
    LineTooLong { got: usize, limit: usize },
}

/// Encodes one message as a newline-terminated JSON line. serde_json
/// escapes embedded newlines and quotes, so the output is always a single
/// line.
pub fn encode_clip(message: &ClipMessage) -> Result<Vec<u8>, CodecError> {
    let mut line =
        serde_json::to_vec(message).map_err(|err| CodecError::Serialization(err.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

/// Decodes the first line of a byte stream. The `clip` key must exist and
/// be a string; anything else is `MalformedMessage`. Bytes past the first
/// newline are ignored.
pub fn decode_clip(bytes: &[u8]) -> Result<ClipMessage, CodecError> {
    serde_json::from_slice(first_line(bytes))
        .map_err(|err| CodecError::MalformedMessage(err.to_string()))
}

fn first_line(bytes: &[u8]) -> &[u8] {
    let line = match bytes.iter().position(|&b| b == b'\n') {
        Some(end) => &bytes[..end],
        None => bytes,
    };
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_text() {
        let message = ClipMessage::new("hello \"quoted\"\nsecond line\ttab ünïcode", 1_735_000_000_000);
        let encoded = encode_clip(&message).unwrap();
        let decoded = decode_clip(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn encode_emits_exactly_one_terminated_line() {
        let encoded = encode_clip(&ClipMessage::new("line one\nline two", 7)).unwrap();
        assert_eq!(encoded.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(encoded.last().copied(), Some(b'\n'));
    }

    #[test]
    fn encode_carries_timestamp_as_decimal_string() {
        let encoded = encode_clip(&ClipMessage::new("x", 1234)).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.contains(r#""timestamp":"1234""#), "wire line was {text}");
        assert!(text.starts_with(r#"{"clip":"x""#), "wire line was {text}");
    }

    #[test]
    fn decode_missing_clip_key_is_malformed() {
        let err = decode_clip(br#"{"timestamp":"1234"}"#).unwrap_err();
        assert!(matches!(err, CodecError::MalformedMessage(_)));
    }

    #[test]
    fn decode_non_string_clip_is_malformed() {
        let err = decode_clip(br#"{"clip":42,"timestamp":"1234"}"#).unwrap_err();
        assert!(matches!(err, CodecError::MalformedMessage(_)));
    }

    #[test]
    fn decode_invalid_json_is_malformed() {
        let err = decode_clip(b"not json at all\n").unwrap_err();
        assert!(matches!(err, CodecError::MalformedMessage(_)));
    }

    #[test]
    fn decode_reads_only_the_first_line() {
        let decoded = decode_clip(b"{\"clip\":\"first\"}\n{\"clip\":\"second\"}\n").unwrap();
        assert_eq!(decoded.clip, "first");
    }

    #[test]
    fn decode_tolerates_absent_timestamp() {
        let decoded = decode_clip(br#"{"clip":"bare"}"#).unwrap();
        assert_eq!(decoded.clip, "bare");
        assert_eq!(decoded.timestamp_unix_ms, 0);
    }

    #[test]
    fn decode_tolerates_unparseable_timestamp() {
        let decoded = decode_clip(br#"{"clip":"x","timestamp":"not-millis"}"#).unwrap();
        assert_eq!(decoded.timestamp_unix_ms, 0);
    }

    #[test]
    fn decode_strips_trailing_carriage_return() {
        let decoded = decode_clip(b"{\"clip\":\"crlf\"}\r\n").unwrap();
        assert_eq!(decoded.clip, "crlf");
    }

    #[test]
    fn default_identity_matches_counterpart_record() {
        let identity = ServiceIdentity::default();
        assert_eq!(identity.name, "ClipSync");
        assert_eq!(
            identity.uuid.to_string(),
            "8ce255c0-200a-11e0-ac64-0800200c9a66"
        );
    }
}
