//! Frame envelope and the payloads carried inside it.
//!
//! Every frame is a JSON object `{"opcode": "...", "payload": ...}`. The
//! opcode is kept as text on the envelope so frames with opcodes this client
//! does not know still parse and can be dropped quietly.

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    core::commit::{CommitEvent, CommitPhase},
    record::Record,
    types::{BucketKey, CommitType, ScopeId},
};

/// Envelope or payload could not be (de)serialized.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Invalid JSON.
    #[error("frame json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opcodes this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Server greeting carrying its version.
    ConnectionInfo,
    /// Client credential.
    Login,
    /// Server verdict on the login.
    LoginStatus,
    /// Subscribe to the commit stream of one scope.
    RegisterGuild,
    /// Opens a commit cycle.
    CommitCreate,
    /// Stages one entity in a cycle.
    CommitPutContent,
    /// Closes a cycle.
    CommitFinalize,
}

impl Opcode {
    /// Every opcode, in handshake-then-stream order.
    pub const ALL: [Opcode; 7] = [
        Opcode::ConnectionInfo,
        Opcode::Login,
        Opcode::LoginStatus,
        Opcode::RegisterGuild,
        Opcode::CommitCreate,
        Opcode::CommitPutContent,
        Opcode::CommitFinalize,
    ];

    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionInfo => "CONNECTION_INFO",
            Self::Login => "LOGIN",
            Self::LoginStatus => "LOGIN_STATUS",
            Self::RegisterGuild => "REGISTER_GUILD",
            Self::CommitCreate => "COMMIT_CREATE",
            Self::CommitPutContent => "COMMIT_PUT_CONTENT",
            Self::CommitFinalize => "COMMIT_FINALIZE",
        }
    }

    /// Parses the wire spelling; unknown text yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == text)
    }

    /// Commit phase for the three commit opcodes.
    pub fn commit_phase(self) -> Option<CommitPhase> {
        match self {
            Self::CommitCreate => Some(CommitPhase::Create),
            Self::CommitPutContent => Some(CommitPhase::PutContent),
            Self::CommitFinalize => Some(CommitPhase::Finalize),
            Self::ConnectionInfo | Self::Login | Self::LoginStatus | Self::RegisterGuild => None,
        }
    }
}

/// One unit on the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Wire opcode text, kept verbatim so unknown opcodes survive parsing.
    pub opcode: String,
    /// Opcode-specific body.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Frame {
    /// Builds a frame from a typed payload.
    pub fn new<T: Serialize>(opcode: Opcode, payload: &T) -> Result<Self, FrameError> {
        Ok(Self {
            opcode: opcode.as_str().to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Known opcode, if any.
    pub fn kind(&self) -> Option<Opcode> {
        Opcode::parse(&self.opcode)
    }

    /// Deserializes the payload into `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        Ok(T::deserialize(&self.payload)?)
    }

    /// Serializes to one line of JSON, without the trailing newline.
    pub fn to_line(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one line of JSON.
    pub fn from_line(line: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// `CONNECTION_INFO` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Server major version.
    #[serde(default)]
    pub app_version_major: u32,
    /// Server minor version.
    #[serde(default)]
    pub app_version_minor: u32,
}

/// `LOGIN` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    /// Token from the [`CredentialProvider`](crate::fetch::CredentialProvider).
    pub access_token: String,
}

/// `LOGIN_STATUS` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginStatus {
    /// True when the login was accepted.
    pub success: bool,
    /// Server explanation, usually on rejection.
    #[serde(default)]
    pub message: Option<String>,
}

/// `REGISTER_GUILD` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterGuild {
    /// Scope to subscribe to.
    pub guild_id: ScopeId,
}

/// Commit id wrapper as sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdRef {
    /// Cycle id.
    pub id_string: String,
}

/// Shared payload of the three commit opcodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    /// Scope the commit belongs to. Numeric ids are accepted and kept as text.
    #[serde(alias = "server_id", deserialize_with = "scope_text")]
    pub guild_id: ScopeId,
    /// Commit type; routes to a bucket together with the scope.
    #[serde(alias = "type")]
    pub commit_type: CommitType,
    /// Cycle id.
    pub commit_id: CommitIdRef,
    /// Present on `COMMIT_PUT_CONTENT` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Record>,
}

impl CommitPayload {
    /// Routing key plus the event the addressed bucket should apply.
    pub fn into_event(self, phase: CommitPhase) -> (BucketKey, CommitEvent) {
        let key = BucketKey::new(self.guild_id, self.commit_type);
        let event = CommitEvent {
            phase,
            commit_type: self.commit_type,
            commit_id: self.commit_id.id_string,
            entity: self.entity,
        };
        (key, event)
    }
}

fn scope_text<'de, D>(deserializer: D) -> Result<ScopeId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(n) => n.to_string(),
    })
}
