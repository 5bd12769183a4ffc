//! Restart Coordinator
//!
//! Dispatches the restart command and sorts each node into confirmed,
//! failed, or pending verification.

use super::verifier::{Clock, CompletionVerifier, PendingSet, VerifyPolicy};
use super::{Outcome, RunReport, WaitMode};
use crate::error::Result;
use crate::network::{
    Command, CommandChannel, CommandPayload, NodeName, OperationResponse, SignatureSource,
};

/// Restarts the management daemon on a set of nodes and confirms completion
pub struct RestartCoordinator<'a> {
    channel: &'a dyn CommandChannel,
    signatures: &'a dyn SignatureSource,
    clock: &'a dyn Clock,
    policy: VerifyPolicy,
}

impl<'a> RestartCoordinator<'a> {
    pub fn new(
        channel: &'a dyn CommandChannel,
        signatures: &'a dyn SignatureSource,
        clock: &'a dyn Clock,
        policy: VerifyPolicy,
    ) -> Self {
        Self {
            channel,
            signatures,
            clock,
            policy,
        }
    }

    /// Restart the daemon on `nodes`.
    ///
    /// Fails only when the restart command itself cannot be delivered; every
    /// per-node problem ends up in the returned report.
    pub async fn restart(&self, nodes: &[NodeName], mode: WaitMode) -> Result<RunReport> {
        tracing::info!("Restarting daemon on nodes {}", nodes.join(", "));

        let payload = CommandPayload::for_nodes(nodes);
        let response = self.channel.invoke(Command::RestartDaemon, &payload).await?;

        let mut report = RunReport::new();
        let pending = classify(nodes, response, &mut report);

        if pending.is_empty() {
            return Ok(report);
        }

        if mode == WaitMode::NoWait {
            tracing::info!("Not waiting for restart of daemon on all nodes");
            for node in pending.nodes() {
                report.record(node, Outcome::Dispatched);
            }
            return Ok(report);
        }

        CompletionVerifier::new(self.signatures, self.clock, self.policy)
            .verify(pending, &mut report)
            .await;

        Ok(report)
    }
}

/// Record immediate results and collect the nodes whose restart must be verified
fn classify(requested: &[NodeName], response: OperationResponse, report: &mut RunReport) -> PendingSet {
    let mut pending = PendingSet::new();

    for (node, status) in &response.node_status {
        match (status.is_ok(), status.signature()) {
            (true, Some(signature)) => pending.insert(node.clone(), signature),
            // Daemons without signature support: trust the acceptance
            (true, None) => report.record(node, Outcome::Restarted { verified: false }),
            (false, _) => report.record(node, Outcome::ImmediateError(status.text.clone())),
        }
    }

    if !response.is_ok() {
        report.error(response.text);
    }

    for node in requested {
        if !pending.contains(node) && !report.has_outcome(node) {
            report.record(node, Outcome::ImmediateError("No response from node".into()));
        }
    }

    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{OperationStatus, SignatureReply};
    use crate::restart::testing::{failed, ok, response, CountingClock, FakeChannel, ScriptedSignatures};

    fn nodes(names: &[&str]) -> Vec<NodeName> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_classify_mixed_dispatch() {
        let reply = response(vec![
            ("A", ok("Success", Some("s1"))),
            ("B", ok("Success", Some("s2"))),
            ("C", failed("denied")),
        ]);
        let mut report = RunReport::new();
        let pending = classify(&nodes(&["A", "B", "C"]), reply, &mut report);

        assert_eq!(pending.len(), 2);
        assert_eq!(pending.baseline("A"), Some("s1"));
        assert_eq!(pending.baseline("B"), Some("s2"));
        assert_eq!(report.outcome("C"), Some(&Outcome::ImmediateError("denied".into())));
        assert!(report.is_failed());
    }

    #[test]
    fn test_classify_without_signature_trusts_acceptance() {
        let reply = response(vec![("old", ok("Success", None)), ("blank", ok("Success", Some("")))]);
        let mut report = RunReport::new();
        let pending = classify(&nodes(&["old", "blank"]), reply, &mut report);

        assert!(pending.is_empty());
        assert_eq!(report.outcome("old"), Some(&Outcome::Restarted { verified: false }));
        assert_eq!(report.outcome("blank"), Some(&Outcome::Restarted { verified: false }));
        assert!(!report.is_failed());
    }

    #[test]
    fn test_classify_reports_silent_nodes() {
        let reply = response(vec![("A", ok("Success", Some("s1")))]);
        let mut report = RunReport::new();
        let pending = classify(&nodes(&["A", "B"]), reply, &mut report);

        assert!(pending.contains("A"));
        assert!(matches!(report.outcome("B"), Some(Outcome::ImmediateError(_))));
    }

    #[test]
    fn test_classify_operation_error() {
        let mut reply = response(vec![("A", ok("Success", None))]);
        reply.status = OperationStatus::Error;
        reply.text = "Unable to restart on some nodes".into();

        let mut report = RunReport::new();
        classify(&nodes(&["A"]), reply, &mut report);
        assert_eq!(report.errors(), ["Unable to restart on some nodes".to_string()]);
        assert!(report.is_failed());
    }

    #[tokio::test]
    async fn test_failed_node_does_not_stop_verification() {
        let channel = FakeChannel::new().reply(
            Command::RestartDaemon,
            response(vec![
                ("A", ok("Success", Some("s1"))),
                ("B", ok("Success", Some("s2"))),
                ("C", failed("denied")),
            ]),
        );
        let signatures = ScriptedSignatures::new()
            .script("A", vec![SignatureReply::Signature("s1b".into())])
            .script("B", vec![SignatureReply::Signature("s2b".into())]);
        let clock = CountingClock::new();
        let coordinator =
            RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());

        let report = coordinator
            .restart(&nodes(&["A", "B", "C"]), WaitMode::Wait)
            .await
            .unwrap();

        assert_eq!(channel.calls(Command::RestartDaemon), vec![nodes(&["A", "B", "C"])]);
        assert_eq!(report.outcome("A"), Some(&Outcome::Restarted { verified: true }));
        assert_eq!(report.outcome("B"), Some(&Outcome::Restarted { verified: true }));
        assert_eq!(report.outcome("C"), Some(&Outcome::ImmediateError("denied".into())));
        assert!(report.is_failed());
        assert_eq!(clock.sleeps(), 1);
    }

    #[tokio::test]
    async fn test_all_failed_skips_verification() {
        let channel = FakeChannel::new().reply(
            Command::RestartDaemon,
            response(vec![("A", failed("denied")), ("B", failed("denied"))]),
        );
        let signatures = ScriptedSignatures::new();
        let clock = CountingClock::new();
        let coordinator =
            RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());

        let report = coordinator
            .restart(&nodes(&["A", "B"]), WaitMode::Wait)
            .await
            .unwrap();

        assert!(report.is_failed());
        assert_eq!(clock.sleeps(), 0);
        assert_eq!(signatures.polls("A"), 0);
    }

    #[tokio::test]
    async fn test_no_wait_returns_after_dispatch() {
        let channel = FakeChannel::new().reply(
            Command::RestartDaemon,
            response(vec![("A", ok("Success", Some("s1"))), ("B", ok("Success", None))]),
        );
        let signatures = ScriptedSignatures::new();
        let clock = CountingClock::new();
        let coordinator =
            RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());

        let report = coordinator
            .restart(&nodes(&["A", "B"]), WaitMode::NoWait)
            .await
            .unwrap();

        assert_eq!(report.outcome("A"), Some(&Outcome::Dispatched));
        assert_eq!(report.outcome("B"), Some(&Outcome::Restarted { verified: false }));
        assert!(!report.is_failed());
        assert_eq!(clock.sleeps(), 0);
        assert_eq!(signatures.polls("A"), 0);
    }

    #[tokio::test]
    async fn test_communication_failure_aborts() {
        let channel = FakeChannel::new().fail(Command::RestartDaemon);
        let signatures = ScriptedSignatures::new();
        let clock = CountingClock::new();
        let coordinator =
            RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());

        let err = coordinator
            .restart(&nodes(&["A"]), WaitMode::Wait)
            .await
            .unwrap_err();
        assert!(err.is_communication());
        assert_eq!(clock.sleeps(), 0);
    }
}
