use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FrameError, Result};
use crate::frame::DecodedFrame;

/// One unit of communication on the message bus.
///
/// Serialized as a JSON object with the fixed keys `FROM`, `TO` and `MSG`.
/// An empty `to` addresses every listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "FROM")]
    pub from: String,
    #[serde(rename = "TO")]
    pub to: String,
    #[serde(rename = "MSG")]
    pub msg: Value,
}

impl Envelope {
    /// Broadcast envelope originating from `from`.
    pub fn new(from: impl Into<String>, msg: impl Into<Value>) -> Self {
        Self {
            from: from.into(),
            to: String::new(),
            msg: msg.into(),
        }
    }

    /// Envelope addressed to a single recipient.
    pub fn addressed(
        from: impl Into<String>,
        to: impl Into<String>,
        msg: impl Into<Value>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            msg: msg.into(),
        }
    }

    /// Envelope carrying a decoded device frame.
    pub fn for_frame(from: impl Into<String>, frame: &DecodedFrame) -> Self {
        Self::new(from, frame.to_value())
    }

    /// Encode as JSON text.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(FrameError::Envelope)
    }

    /// Decode from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(FrameError::Envelope)
    }

    /// Interpret the payload as a decoded device frame.
    pub fn frame(&self) -> Option<DecodedFrame> {
        DecodedFrame::from_value(self.msg.clone()).ok()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match &self.msg {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        write!(f, "Message(FROM: {}, TO: {}, MSG: {})", self.from, self.to, msg)
    }
}
