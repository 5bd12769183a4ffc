//! Network Module
//!
//! Typed view of the management daemon's remote command channel and of the
//! per-node instance signature check.

mod client;

pub use client::HttpChannel;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::certs::CertificateBundle;
use crate::error::Result;

/// Identifier of a cluster member
pub type NodeName = String;

/// Commands the daemon channel can fan out to nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Push local certificate and key to the target nodes
    DistributeCertificates,
    /// Restart the management daemon on the target nodes
    RestartDaemon,
}

impl Command {
    /// Name of the command on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::DistributeCertificates => "distribute_certificates",
            Command::RestartDaemon => "restart_daemon",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload sent with a command
#[derive(Debug, Clone, Serialize)]
pub struct CommandPayload {
    /// Target nodes
    pub nodes: Vec<NodeName>,
    /// Certificate material, only for certificate distribution
    #[serde(flatten)]
    pub certificates: Option<CertificateBundle>,
}

impl CommandPayload {
    pub fn for_nodes(nodes: &[NodeName]) -> Self {
        Self {
            nodes: nodes.to_vec(),
            certificates: None,
        }
    }

    pub fn with_certificates(mut self, bundle: CertificateBundle) -> Self {
        self.certificates = Some(bundle);
        self
    }
}

/// Status of an operation, overall or on a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Ok,
    Error,
}

/// Result of a command on a single node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub status: OperationStatus,
    #[serde(default)]
    pub text: String,
    /// Present only on daemons able to report their instance signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_signature: Option<String>,
}

impl NodeStatus {
    pub fn is_ok(&self) -> bool {
        self.status == OperationStatus::Ok
    }

    /// Instance signature, treating an empty value as absent
    pub fn signature(&self) -> Option<&str> {
        self.instance_signature.as_deref().filter(|s| !s.is_empty())
    }
}

/// Decoded reply of a successful channel call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub status: OperationStatus,
    #[serde(default)]
    pub text: String,
    pub node_status: BTreeMap<NodeName, NodeStatus>,
}

impl OperationResponse {
    pub fn is_ok(&self) -> bool {
        self.status == OperationStatus::Ok
    }
}

/// Channel that sends one command to a set of nodes in a single call.
///
/// An `Err` means the call itself failed (transport error or undecodable
/// reply); per-node failures are carried inside the response.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn invoke(&self, command: Command, payload: &CommandPayload) -> Result<OperationResponse>;
}

/// Reply of an instance signature check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureReply {
    /// Daemon answered with its current signature
    Signature(String),
    /// No valid token for the node
    NotAuthorized(String),
    /// Token was accepted but lacks permission
    PermissionDenied(String),
    /// Daemon unreachable or returned an unexpected error
    Unreachable(String),
}

impl SignatureReply {
    pub const SUCCESS: i32 = 0;
    pub const NOT_AUTHORIZED: i32 = 3;
    pub const PERMISSION_DENIED: i32 = 4;

    /// Build a reply from a numeric status code and its accompanying text
    pub fn from_code(code: i32, output: impl Into<String>) -> Self {
        let output = output.into();
        match code {
            Self::SUCCESS => SignatureReply::Signature(output),
            Self::NOT_AUTHORIZED => SignatureReply::NotAuthorized(output),
            Self::PERMISSION_DENIED => SignatureReply::PermissionDenied(output),
            _ => SignatureReply::Unreachable(output),
        }
    }

    /// Numeric status code of this reply (any unreachable reply maps to 1)
    pub fn code(&self) -> i32 {
        match self {
            SignatureReply::Signature(_) => Self::SUCCESS,
            SignatureReply::NotAuthorized(_) => Self::NOT_AUTHORIZED,
            SignatureReply::PermissionDenied(_) => Self::PERMISSION_DENIED,
            SignatureReply::Unreachable(_) => 1,
        }
    }

    /// Whether retrying this node cannot help within the same run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignatureReply::NotAuthorized(_) | SignatureReply::PermissionDenied(_)
        )
    }
}

/// Lightweight per-node instance signature check
#[async_trait]
pub trait SignatureSource: Send + Sync {
    async fn query_signature(&self, node: &str) -> SignatureReply;
}
