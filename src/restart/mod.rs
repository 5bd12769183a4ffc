//! Restart Coordination
//!
//! Pushes a restart (optionally preceded by certificate distribution) to a set
//! of nodes, then proves each restart happened by watching the daemon's
//! instance signature change.
//!
//! # Flow
//!
//! ```text
//! CertificateSync -> RestartCoordinator -> CompletionVerifier
//! ```
//!
//! Every node handed to the coordinator ends the run with exactly one
//! [`Outcome`] in the [`RunReport`].

mod coordinator;
mod sync;
mod verifier;

pub use coordinator::RestartCoordinator;
pub use sync::{CertificateSync, SyncOutcome, SyncRunReport};
pub use verifier::{Clock, CompletionVerifier, PendingSet, TokioClock, VerifyPolicy};

use std::collections::BTreeMap;

use crate::network::NodeName;

/// Whether to wait for restarts to be confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Poll until every node is confirmed or the budget runs out
    #[default]
    Wait,
    /// Return right after the restart command is dispatched
    NoWait,
}

/// Terminal fate of a single node in a restart run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Restart done; `verified` is false when the daemon could not prove it
    Restarted { verified: bool },
    /// Restart accepted but the signature never changed within the budget
    NotRestartedInTime,
    /// Node rejected the restart command
    ImmediateError(String),
    /// Node refused the signature check; abandoned for this run
    AuthError(String),
    /// Restart accepted, completion not awaited
    Dispatched,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::NotRestartedInTime | Outcome::ImmediateError(_) | Outcome::AuthError(_)
        )
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Restarted { verified: true } => write!(f, "Success"),
            Outcome::Restarted { verified: false } => write!(f, "Success (unverified)"),
            Outcome::NotRestartedInTime => write!(f, "Not restarted"),
            Outcome::ImmediateError(msg) => write!(f, "Error: {}", msg),
            Outcome::AuthError(msg) => write!(f, "Authorization error: {}", msg),
            Outcome::Dispatched => write!(f, "Restart requested"),
        }
    }
}

/// Per-node outcomes and operation-level errors of one restart run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    outcomes: BTreeMap<NodeName, Outcome>,
    errors: Vec<String>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the terminal outcome of a node.
    ///
    /// A node keeps the first outcome recorded for it.
    pub fn record(&mut self, node: &str, outcome: Outcome) {
        if let Some(existing) = self.outcomes.get(node) {
            tracing::warn!(
                "Ignoring second outcome '{}' for {}, already '{}'",
                outcome,
                node,
                existing
            );
            return;
        }

        if outcome.is_failure() {
            tracing::error!("{}: {}", node, outcome);
        } else {
            tracing::info!("{}: {}", node, outcome);
        }
        self.outcomes.insert(node.to_string(), outcome);
    }

    /// Record an error that is not tied to one node
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.errors.push(message);
    }

    pub fn outcome(&self, node: &str) -> Option<&Outcome> {
        self.outcomes.get(node)
    }

    pub fn outcomes(&self) -> &BTreeMap<NodeName, Outcome> {
        &self.outcomes
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_outcome(&self, node: &str) -> bool {
        self.outcomes.contains_key(node)
    }

    /// True if any node failed or an operation-level error was reported
    pub fn is_failed(&self) -> bool {
        !self.errors.is_empty() || self.outcomes.values().any(Outcome::is_failure)
    }
}
