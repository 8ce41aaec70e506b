use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::codec::match_frame;
use crate::protocol::SOURCE_TAG;

/// Sequence number reported for lines that failed the wrapper grammar.
pub const SEQUENCE_UNKNOWN: i64 = -1;

/// Timestamp format used in frames and error descriptors (second resolution).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// The `N` of a `<N>BODY</N>` line, kept as the digits the device sent.
///
/// Numbers of any length survive. On the wire a sequence is a JSON number
/// when it fits in a `u64` and a digit string otherwise; a line that failed
/// the wrapper grammar carries [`SEQUENCE_UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sequence {
    Unknown,
    Number(String),
}

impl Sequence {
    pub fn number(n: u64) -> Self {
        Self::Number(n.to_string())
    }

    /// Sequence from a run of ASCII digits. Anything else is `None`.
    pub fn from_digits(digits: &str) -> Option<Self> {
        (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .then(|| Self::Number(digits.to_string()))
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    pub fn digits(&self) -> Option<&str> {
        match self {
            Self::Unknown => None,
            Self::Number(digits) => Some(digits.as_str()),
        }
    }

    /// Numeric value, when it fits in a `u64`.
    pub fn value(&self) -> Option<u64> {
        self.digits().and_then(|digits| digits.parse().ok())
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "{SEQUENCE_UNKNOWN}"),
            Self::Number(digits) => f.write_str(digits),
        }
    }
}

impl Serialize for Sequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (self, self.value()) {
            (Self::Unknown, _) => serializer.serialize_i64(SEQUENCE_UNKNOWN),
            (Self::Number(_), Some(n)) => serializer.serialize_u64(n),
            (Self::Number(digits), None) => serializer.serialize_str(digits),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SequenceRepr {
    Unsigned(u64),
    Signed(i64),
    Digits(String),
}

impl<'de> Deserialize<'de> for Sequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match SequenceRepr::deserialize(deserializer)? {
            SequenceRepr::Unsigned(n) => Ok(Self::number(n)),
            SequenceRepr::Signed(_) => Ok(Self::Unknown),
            SequenceRepr::Digits(digits) => Self::from_digits(&digits)
                .ok_or_else(|| D::Error::custom(format!("invalid sequence number: {digits}"))),
        }
    }
}

/// Describes why a frame body could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub timestamp: String,
    /// Signature of the gateway that produced the error.
    pub from: String,
    pub source: String,
    /// Stage that failed.
    pub function: String,
    pub error: String,
}

impl ErrorDescriptor {
    /// Descriptor stamped with the current time and the `ComPort` source tag.
    pub fn new(from: &str, function: &str, error: impl ToString) -> Self {
        Self {
            timestamp: timestamp_now(),
            from: from.to_string(),
            source: SOURCE_TAG.to_string(),
            function: function.to_string(),
            error: error.to_string(),
        }
    }
}

/// Payload carried by a [`DecodedFrame`].
///
/// Serialized without a tag, so the variant cannot be told from the JSON
/// alone; [`DecodedFrame`] recovers it from the sequence and the raw line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FramePayload {
    /// The body could not be decoded; the descriptor explains why.
    DecodeError(ErrorDescriptor),
    /// The line did not match the wrapper at all.
    Missing,
    /// The decoded body.
    Data(Value),
}

impl FramePayload {
    /// Rebuild the payload of a frame read back from the bus.
    ///
    /// No sequence means the wrapper did not match. Otherwise the body inside
    /// `raw` decides: valid JSON means `data` is the body itself, even when
    /// it looks like an error descriptor or is `null`.
    fn from_wire(sequence: &Sequence, raw: &str, data: Value) -> Self {
        if !sequence.is_known() {
            return Self::Missing;
        }
        let body_decodes = match_frame(raw)
            .map(|found| serde_json::from_str::<Value>(found.body).is_ok());
        if body_decodes == Some(true) {
            return Self::Data(data);
        }
        match ErrorDescriptor::deserialize(&data) {
            Ok(descriptor) => Self::DecodeError(descriptor),
            Err(_) => Self::Data(data),
        }
    }
}

/// One line from the device after decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedFrame {
    /// Capture time, second resolution.
    pub timestamp: String,
    /// The line exactly as received, without its terminator.
    pub raw: String,
    /// Device sequence number.
    #[serde(rename = "cmd_number")]
    pub sequence: Sequence,
    #[serde(rename = "data")]
    pub payload: FramePayload,
}

#[derive(Deserialize)]
struct FrameRepr {
    timestamp: String,
    raw: String,
    cmd_number: Sequence,
    #[serde(default)]
    data: Value,
}

impl<'de> Deserialize<'de> for DecodedFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = FrameRepr::deserialize(deserializer)?;
        let payload = FramePayload::from_wire(&repr.cmd_number, &repr.raw, repr.data);
        Ok(Self {
            timestamp: repr.timestamp,
            raw: repr.raw,
            sequence: repr.cmd_number,
            payload,
        })
    }
}

impl DecodedFrame {
    /// A frame whose body decoded successfully.
    pub fn data(raw: impl Into<String>, sequence: Sequence, payload: Value) -> Self {
        Self {
            timestamp: timestamp_now(),
            raw: raw.into(),
            sequence,
            payload: FramePayload::Data(payload),
        }
    }

    /// A frame whose wrapper matched but whose body did not decode.
    pub fn decode_error(
        raw: impl Into<String>,
        sequence: Sequence,
        error: ErrorDescriptor,
    ) -> Self {
        Self {
            timestamp: timestamp_now(),
            raw: raw.into(),
            sequence,
            payload: FramePayload::DecodeError(error),
        }
    }

    /// A diagnostic record for a line that failed the wrapper grammar.
    pub fn malformed(raw: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp_now(),
            raw: raw.into(),
            sequence: Sequence::Unknown,
            payload: FramePayload::Missing,
        }
    }

    /// Whether the wrapper matched (the sequence number is meaningful).
    pub fn has_sequence(&self) -> bool {
        self.sequence.is_known()
    }

    /// Whether the body decoded into data.
    pub fn is_data(&self) -> bool {
        matches!(self.payload, FramePayload::Data(_))
    }

    /// The decoded body, if any.
    pub fn data_value(&self) -> Option<&Value> {
        match &self.payload {
            FramePayload::Data(value) => Some(value),
            _ => None,
        }
    }

    /// JSON value of the whole frame, as carried in an envelope.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Rebuild a frame from an envelope payload.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn data_frame_serializes_with_wire_keys() {
        let frame = DecodedFrame::data(
            "<5>{\"cmd\":\"ok\"}</5>",
            Sequence::number(5),
            json!({"cmd": "ok"}),
        );
        let value = frame.to_value();

        assert_eq!(value["cmd_number"], 5);
        assert_eq!(value["raw"], "<5>{\"cmd\":\"ok\"}</5>");
        assert_eq!(value["data"], json!({"cmd": "ok"}));
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn decode_error_frame_keeps_sequence() {
        let descriptor = ErrorDescriptor::new("10.0.0.2:/dev/ttyUSB0", "decode_body", "bad json");
        let frame =
            DecodedFrame::decode_error("<7>{oops</7>", Sequence::number(7), descriptor.clone());

        assert!(frame.has_sequence());
        assert!(!frame.is_data());
        assert_eq!(frame.sequence.value(), Some(7));

        let value = frame.to_value();
        assert_eq!(value["data"]["source"], "ComPort");
        assert_eq!(value["data"]["error"], "bad json");

        let back = DecodedFrame::from_value(value).unwrap();
        assert_eq!(back.payload, FramePayload::DecodeError(descriptor));
    }

    #[test]
    fn malformed_frame_uses_sentinel() {
        let frame = DecodedFrame::malformed("garbage");
        assert_eq!(frame.sequence, Sequence::Unknown);
        assert!(!frame.has_sequence());
        assert_eq!(frame.raw, "garbage");
        let value = frame.to_value();
        assert_eq!(value["cmd_number"], SEQUENCE_UNKNOWN);
        assert_eq!(value["data"], Value::Null);
    }

    #[test]
    fn sequence_beyond_u64_keeps_its_digits() {
        let digits = "123456789012345678901";
        let sequence = Sequence::from_digits(digits).unwrap();
        assert_eq!(sequence.value(), None);
        assert_eq!(sequence.to_string(), digits);

        let raw = format!("<{digits}>{{}}</{digits}>");
        let frame = DecodedFrame::data(raw, sequence.clone(), json!({}));
        let value = frame.to_value();
        assert_eq!(value["cmd_number"], digits);
        assert_eq!(DecodedFrame::from_value(value).unwrap().sequence, sequence);
    }

    #[test]
    fn sequence_above_i64_max_is_not_clamped() {
        let n = i64::MAX as u64 + 1;
        let frame = DecodedFrame::data(format!("<{n}>1</{n}>"), Sequence::number(n), json!(1));
        let value = frame.to_value();
        assert_eq!(value["cmd_number"].as_u64(), Some(n));
        assert_eq!(DecodedFrame::from_value(value).unwrap().sequence.value(), Some(n));
    }

    #[test]
    fn null_body_reads_back_as_data() {
        let frame = DecodedFrame::data("<3>null</3>", Sequence::number(3), Value::Null);
        let back = DecodedFrame::from_value(frame.to_value()).unwrap();
        assert_eq!(back.payload, FramePayload::Data(Value::Null));
    }

    #[test]
    fn body_shaped_like_a_descriptor_reads_back_as_data() {
        let descriptor = ErrorDescriptor::new("dev", "decode_body", "nope");
        let body = serde_json::to_value(&descriptor).unwrap();
        let raw = format!("<4>{body}</4>");
        let frame = DecodedFrame::data(raw, Sequence::number(4), body.clone());

        let back = DecodedFrame::from_value(frame.to_value()).unwrap();
        assert_eq!(back.payload, FramePayload::Data(body));
    }

    #[test]
    fn malformed_frame_reads_back_as_missing() {
        let frame = DecodedFrame::malformed("<1>x</2>");
        let back = DecodedFrame::from_value(frame.to_value()).unwrap();
        assert_eq!(back.payload, FramePayload::Missing);
        assert_eq!(back.sequence, Sequence::Unknown);
    }

    #[test]
    fn sequence_rejects_non_digits() {
        assert_eq!(Sequence::from_digits(""), None);
        assert_eq!(Sequence::from_digits("12a"), None);
        assert!(serde_json::from_value::<Sequence>(json!("x1")).is_err());
        assert_eq!(serde_json::from_value::<Sequence>(json!(-1)).unwrap(), Sequence::Unknown);
    }

    #[test]
    fn timestamp_has_second_resolution() {
        let ts = timestamp_now();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok());
    }
}
