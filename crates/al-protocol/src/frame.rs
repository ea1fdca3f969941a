//! Agent-facing line frames
//!
//! The agent speaks UTF-8 text with one JSON object per `\n`-terminated
//! line. Requests are always `{"content": "..."}`. Replies are read
//! leniently: a line that is not an object with a string `content` field is
//! passed through verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Line delimiter on the agent stream
pub const LINE_DELIMITER: u8 = b'\n';

/// One request written to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub content: String,
}

impl AgentRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Encode as a single `\n`-terminated line
    ///
    /// Newlines inside `content` are JSON-escaped, so the result contains
    /// exactly one delimiter.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self)?;
        line.push(LINE_DELIMITER as char);
        Ok(line)
    }
}

/// One reply line read from the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFrame {
    pub content: String,
}

impl AgentFrame {
    /// Interpret a complete, trimmed line from the agent
    pub fn from_line(line: &str) -> Self {
        // Only an object carries fields; serde would also map `["x"]` onto a
        // struct positionally.
        let content = serde_json::from_str::<Value>(line).ok().and_then(|value| match value {
            Value::Object(mut fields) => match fields.remove("content") {
                Some(Value::String(content)) => Some(content),
                _ => None,
            },
            _ => None,
        });

        match content {
            Some(content) => Self { content },
            None => {
                tracing::trace!("Agent line is not a content object, passing through");
                Self {
                    content: line.to_string(),
                }
            }
        }
    }
}
