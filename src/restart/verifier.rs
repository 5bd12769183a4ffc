//! Completion Verifier
//!
//! Polls pending nodes for their instance signature until each one has
//! changed (restart proven), refused us permanently, or the wait budget is
//! spent. Unreachable nodes are assumed to be mid-restart and are retried.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use super::{Outcome, RunReport};
use crate::network::{NodeName, SignatureReply, SignatureSource};

/// Source of the pause between polling rounds
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Polling schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyPolicy {
    /// Pause before each round
    pub interval: Duration,
    /// Total time allowed for all nodes
    pub budget: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            budget: Duration::from_secs(300),
        }
    }
}

impl VerifyPolicy {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self { interval, budget }
    }

    /// Number of polling rounds the budget allows
    pub fn rounds(&self) -> u32 {
        let interval = self.interval.as_millis();
        if interval == 0 {
            return 1;
        }
        u32::try_from(self.budget.as_millis() / interval).unwrap_or(u32::MAX)
    }
}

/// Nodes whose restart is not yet proven, keyed to their pre-restart signature
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSet {
    baselines: BTreeMap<NodeName, String>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: impl Into<NodeName>, signature: impl Into<String>) {
        self.baselines.insert(node.into(), signature.into());
    }

    pub fn remove(&mut self, node: &str) -> Option<String> {
        self.baselines.remove(node)
    }

    pub fn baseline(&self, node: &str) -> Option<&str> {
        self.baselines.get(node).map(String::as_str)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.baselines.contains_key(node)
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    /// Pending nodes in name order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeName> {
        self.baselines.keys()
    }
}

/// Confirms restarts by watching instance signatures change
pub struct CompletionVerifier<'a> {
    signatures: &'a dyn SignatureSource,
    clock: &'a dyn Clock,
    policy: VerifyPolicy,
}

impl<'a> CompletionVerifier<'a> {
    pub fn new(signatures: &'a dyn SignatureSource, clock: &'a dyn Clock, policy: VerifyPolicy) -> Self {
        Self {
            signatures,
            clock,
            policy,
        }
    }

    /// Poll until `pending` drains or the budget is spent.
    ///
    /// Every node in `pending` gets exactly one outcome in `report`. Returns
    /// the number of rounds polled.
    pub async fn verify(&self, mut pending: PendingSet, report: &mut RunReport) -> u32 {
        let rounds = self.policy.rounds();
        let mut polled = 0;

        tracing::debug!(
            "Verifying restart of {} node(s), up to {} rounds every {:?}",
            pending.len(),
            rounds,
            self.policy.interval
        );

        for round in 1..=rounds {
            if pending.is_empty() {
                break;
            }
            self.clock.sleep(self.policy.interval).await;
            polled = round;

            let replies = join_all(pending.nodes().map(|node| async move {
                (node.clone(), self.signatures.query_signature(node).await)
            }))
            .await;

            for (node, reply) in replies {
                self.apply(&node, reply, &mut pending, report);
            }
        }

        for node in pending.nodes() {
            report.record(node, Outcome::NotRestartedInTime);
        }

        polled
    }

    fn apply(&self, node: &str, reply: SignatureReply, pending: &mut PendingSet, report: &mut RunReport) {
        tracing::trace!("{}: signature check returned code {}", node, reply.code());
        match reply {
            SignatureReply::Signature(current) => {
                if pending.baseline(node).is_some_and(|baseline| baseline != current) {
                    pending.remove(node);
                    report.record(node, Outcome::Restarted { verified: true });
                } else {
                    tracing::trace!("{}: signature unchanged, still restarting", node);
                }
            }
            SignatureReply::NotAuthorized(message) | SignatureReply::PermissionDenied(message) => {
                pending.remove(node);
                report.record(node, Outcome::AuthError(message));
            }
            // A daemon that is mid-restart refuses connections; try next round
            SignatureReply::Unreachable(message) => {
                tracing::debug!("{}: not reachable yet ({})", node, message);
            }
        }
    }
}
