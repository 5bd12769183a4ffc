//! ClusterCtl - Cluster Management Daemon Control
//!
//! Coordinates restarts of the management daemon across cluster nodes and
//! proves each restart happened, independently of what the daemon reports
//! when it accepts the command.
//!
//! # Architecture
//!
//! Commands travel through the local daemon, which fans them out to the
//! target nodes and answers with a per-node status map. Completion is then
//! checked node by node: each daemon run carries an instance signature that
//! changes across restarts, so a changed signature is proof of a restart.
//!
//! # Features
//!
//! - Certificate distribution followed by a restart of the accepting nodes
//! - Restart dispatch with bounded, round-based completion polling
//! - Per-node outcome report; partial failures never hide other nodes
//! - Local certificate install and authorized token revocation

pub mod config;
pub mod error;
pub mod network;
pub mod restart;
pub mod certs;
pub mod tokens;

pub use config::ClusterCtlConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ClusterCtlConfig;
    pub use crate::error::{Error, Result};
    pub use crate::network::{CommandChannel, HttpChannel, NodeName, SignatureSource};
    pub use crate::restart::{
        CertificateSync, Outcome, RestartCoordinator, RunReport, VerifyPolicy, WaitMode,
    };
    pub use crate::certs::{CertificateBundle, InstallOptions};
    pub use crate::tokens::TokenStore;
}
