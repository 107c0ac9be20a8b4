//! Shared wire model for the relay socket.
//!
//! This crate owns the text representation used by both the relay server and
//! `relay-cli`. Clients send JSON envelopes addressed to a peer; the server
//! forwards the envelope text untouched and speaks to clients itself only
//! through plain-text notices (welcome, peer list).

use serde::{Deserialize, Serialize};

/// Prefix of the welcome notice sent as the first frame of every connection.
pub const WELCOME_PREFIX: &str = "Welcome! Your ID is: ";

/// Prefix of the peer-list notice.
pub const PEERS_PREFIX: &str = "Connected clients: ";

/// Error returned by [`decode_envelope`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not a JSON object with string `id` and `message` fields.
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// One addressed message: `id` names the recipient, `message` is the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub message: String,
}

impl Envelope {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { id: id.into(), message: message.into() }
    }
}

/// Encode an envelope as its JSON wire text.
#[must_use]
pub fn encode_envelope(envelope: &Envelope) -> String {
    // A struct of two strings always serializes.
    serde_json::to_string(envelope).unwrap_or_default()
}

/// Decode JSON wire text into an [`Envelope`].
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the text is not an object carrying both
/// string fields. Unknown extra fields are ignored.
pub fn decode_envelope(text: &str) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_str(text)?)
}

// =============================================================================
// NOTICES
// =============================================================================

/// Server-originated notice. Rendered as plain text, not JSON.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    /// Carries the identifier assigned to the receiving connection.
    Welcome { id: String },
    /// Identifiers of every other registered client.
    Peers(Vec<String>),
}

impl Notice {
    /// Render the notice as frame text.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Welcome { id } => format!("{WELCOME_PREFIX}{id}"),
            Self::Peers(ids) => format!("{PEERS_PREFIX}[{}]", ids.join(" ")),
        }
    }

    /// Recognize a notice in received frame text. Returns `None` for relayed
    /// envelopes and anything else.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        if let Some(id) = text.strip_prefix(WELCOME_PREFIX) {
            return Some(Self::Welcome { id: id.trim().to_owned() });
        }
        let list = text.strip_prefix(PEERS_PREFIX)?;
        let inner = list.strip_prefix('[')?.strip_suffix(']')?;
        Some(Self::Peers(inner.split_whitespace().map(str::to_owned).collect()))
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
