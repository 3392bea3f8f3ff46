//! Bridge Error Handling
//!
//! Typed errors for the GhostText bridge plus the user-facing rendering used
//! when an error is surfaced through the host's notification mechanism.

use std::fmt;

/// Stage of buffer materialization or use that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStage {
    /// Allocating scratch storage
    Allocate,
    /// Opening scratch storage as a document
    Open,
    /// Presenting the document to the user
    Present,
    /// Applying an edit to the document
    Edit,
    /// Reading the document back
    Read,
}

impl fmt::Display for ResourceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ResourceStage::Allocate => "allocate",
            ResourceStage::Open => "open",
            ResourceStage::Present => "present",
            ResourceStage::Edit => "edit",
            ResourceStage::Read => "read",
        };
        f.write_str(stage)
    }
}

/// Errors raised by the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Inbound frame was not a well-formed GhostText message
    #[error("malformed GhostText message: {0}")]
    ProtocolParse(#[from] serde_json::Error),

    /// The backing buffer could not be materialized or used
    #[error("failed to {stage} scratch buffer: {source}")]
    Resource {
        stage: ResourceStage,
        #[source]
        source: anyhow::Error,
    },

    /// The socket side failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Wrap any error as a resource failure at `stage`
    pub fn resource(stage: ResourceStage, source: impl Into<anyhow::Error>) -> Self {
        BridgeError::Resource {
            stage,
            source: source.into(),
        }
    }

    /// Category used to pick notification wording
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::ProtocolParse(_) => ErrorCategory::Protocol,
            BridgeError::Resource { .. } => ErrorCategory::Resource,
            BridgeError::Transport(_) => ErrorCategory::Network,
            BridgeError::Config(_) => ErrorCategory::Configuration,
            BridgeError::Io(_) => ErrorCategory::FileSystem,
        }
    }

    /// Render the error the way it is shown to the user
    pub fn user_message(&self) -> String {
        let (context, suggestions) = context_and_suggestions(self);

        let mut output = format!("❌ Error: {}\n", self);

        if !context.is_empty() {
            output.push_str("\n📋 Context:\n");
            for ctx in &context {
                output.push_str(&format!("   • {}\n", ctx));
            }
        }

        if !suggestions.is_empty() {
            output.push_str("\n💡 Suggestions:\n");
            for suggestion in &suggestions {
                output.push_str(&format!("   • {}\n", suggestion));
            }
        }

        output
    }
}

/// Categorized error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The browser client sent something we could not understand
    Protocol,

    /// The editor-side buffer failed
    Resource,

    /// Socket-level failures
    Network,

    /// Bad configuration (not recoverable without user action)
    Configuration,

    /// File system errors
    FileSystem,
}

impl ErrorCategory {
    /// Whether the session that hit this error can keep going
    pub fn keeps_session_alive(&self) -> bool {
        matches!(self, ErrorCategory::Protocol)
    }
}

fn context_and_suggestions(error: &BridgeError) -> (Vec<String>, Vec<String>) {
    let mut context = Vec::new();
    let mut suggestions = Vec::new();

    match error {
        BridgeError::ProtocolParse(_) => {
            context.push("The browser sent a frame that is not GhostText JSON".to_string());
            suggestions.push("The message was ignored; keep typing in the browser".to_string());
            suggestions.push("Update the GhostText browser extension".to_string());
        }
        BridgeError::Resource { stage, .. } => {
            context.push(format!("Editor buffer failed at the {} stage", stage));
            if *stage == ResourceStage::Present {
                suggestions.push("Check the configured editor command".to_string());
                suggestions.push(
                    "Use an editor flag that blocks until the file is closed (e.g. --wait)"
                        .to_string(),
                );
            } else {
                suggestions.push("Check the scratch directory permissions".to_string());
            }
            suggestions.push("Reconnect from the browser to try again".to_string());
        }
        BridgeError::Transport(_) => {
            context.push("Connection to the browser failed".to_string());
            suggestions.push("Reconnect from the browser".to_string());
        }
        BridgeError::Config(_) => {
            context.push("Configuration error detected".to_string());
            suggestions.push("Review your config.toml".to_string());
            suggestions.push("Run with --help for valid options".to_string());
        }
        BridgeError::Io(_) => {
            context.push("File system operation failed".to_string());
            suggestions.push("Check file permissions".to_string());
            suggestions.push("Is another GhostText server already using the port?".to_string());
        }
    }

    (context, suggestions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            BridgeError::from(parse_err).category(),
            ErrorCategory::Protocol
        );

        let res_err = BridgeError::resource(ResourceStage::Open, anyhow::anyhow!("gone"));
        assert_eq!(res_err.category(), ErrorCategory::Resource);

        let cfg_err = BridgeError::Config("bad port".into());
        assert_eq!(cfg_err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_session_survival() {
        assert!(ErrorCategory::Protocol.keeps_session_alive());
        assert!(!ErrorCategory::Resource.keeps_session_alive());
    }

    #[test]
    fn test_user_message_mentions_stage() {
        let err = BridgeError::resource(ResourceStage::Present, anyhow::anyhow!("no such file"));
        let message = err.user_message();
        assert!(message.contains("failed to present scratch buffer: no such file"));
        assert!(message.contains("--wait"));
    }
}
