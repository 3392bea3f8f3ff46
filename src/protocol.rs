//! GhostText wire messages
//!
//! Every frame carries the full buffer text, never a diff.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Protocol version reported by the status endpoint
pub const PROTOCOL_VERSION: u32 = 1;

/// Well-known port browsers probe for a running GhostText server
pub const DEFAULT_STATUS_PORT: u16 = 4001;

/// Syntax mode is not synchronized; outbound frames carry this placeholder
pub const PLACEHOLDER_SYNTAX: &str = "TODO";

/// Message sent by the browser client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientMessage {
    /// Only meaningful on the first message of a session
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
}

impl ClientMessage {
    /// Parse one text frame. Unknown fields are ignored.
    pub fn parse(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Selection range. Never populated by this bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

/// Message sent back to the browser for local-origin edits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorMessage {
    pub selections: Vec<Selection>,
    pub syntax: String,
    pub text: String,
    pub title: String,
}

impl EditorMessage {
    pub fn new(text: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            selections: Vec::new(),
            syntax: PLACEHOLDER_SYNTAX.to_string(),
            text: text.into(),
            title: title.into(),
        }
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Body of the HTTP status response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "ProtocolVersion")]
    pub protocol_version: u32,
    #[serde(rename = "WebSocketPort")]
    pub web_socket_port: u16,
}

impl StatusResponse {
    pub fn new(web_socket_port: u16) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            web_socket_port,
        }
    }
}
