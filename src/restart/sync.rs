//! Certificate Sync Orchestrator
//!
//! Distributes the local daemon certificate to cluster nodes and restarts the
//! daemon on the nodes that took it, so the new certificate gets loaded.

use std::collections::BTreeMap;

use super::coordinator::RestartCoordinator;
use super::{RunReport, WaitMode};
use crate::certs::CertificateBundle;
use crate::error::Result;
use crate::network::{Command, CommandChannel, CommandPayload, NodeName};

/// Result of distributing certificates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Nodes that stored the certificate, in name order
    pub accepted: Vec<NodeName>,
    /// Nodes that refused it, with their message
    pub rejected: BTreeMap<NodeName, String>,
    /// Operation-level error reported by the daemon
    pub operation_error: Option<String>,
}

/// Requested node that the daemon left out of its reply
const NO_RESPONSE: &str = "No response from node";

impl SyncOutcome {
    pub fn any_failed(&self) -> bool {
        !self.rejected.is_empty() || self.operation_error.is_some()
    }
}

/// Certificate distribution followed by the restart it requires
#[derive(Debug, Clone, Default)]
pub struct SyncRunReport {
    pub sync: SyncOutcome,
    /// Absent when no node accepted the certificate or the restart call failed
    pub restart: Option<RunReport>,
    /// Restart command could not be delivered after a successful sync
    pub restart_error: Option<String>,
}

impl SyncRunReport {
    pub fn is_failed(&self) -> bool {
        self.sync.any_failed()
            || self.restart_error.is_some()
            || self.restart.as_ref().is_some_and(RunReport::is_failed)
    }
}

/// Pushes certificates and hands accepting nodes to the restart coordinator
pub struct CertificateSync<'a> {
    channel: &'a dyn CommandChannel,
    restarter: &'a RestartCoordinator<'a>,
}

impl<'a> CertificateSync<'a> {
    pub fn new(channel: &'a dyn CommandChannel, restarter: &'a RestartCoordinator<'a>) -> Self {
        Self { channel, restarter }
    }

    /// Send the certificate bundle to `nodes` and sort them by acceptance
    pub async fn distribute(&self, nodes: &[NodeName], bundle: &CertificateBundle) -> Result<SyncOutcome> {
        tracing::info!("Synchronizing daemon certificates on nodes {}...", nodes.join(", "));

        let payload = CommandPayload::for_nodes(nodes).with_certificates(bundle.clone());
        let response = self
            .channel
            .invoke(Command::DistributeCertificates, &payload)
            .await?;

        let operation_ok = response.is_ok();
        let mut outcome = SyncOutcome::default();
        for (node, status) in response.node_status {
            if status.is_ok() {
                tracing::info!("{}: {}", node, status.text);
                outcome.accepted.push(node);
            } else {
                tracing::warn!("{}: {}", node, status.text);
                outcome.rejected.insert(node, status.text);
            }
        }

        for node in nodes {
            if !outcome.accepted.contains(node) && !outcome.rejected.contains_key(node) {
                tracing::warn!("{}: {}", node, NO_RESPONSE);
                outcome.rejected.insert(node.clone(), NO_RESPONSE.to_string());
            }
        }

        if !operation_ok {
            tracing::error!("{}", response.text);
            outcome.operation_error = Some(response.text);
        }

        Ok(outcome)
    }

    /// Distribute certificates, then restart the daemon where they were accepted.
    ///
    /// Nodes that never confirmed the certificate are not restarted. A failed
    /// restart call after a successful sync is returned in the report so the
    /// sync results are not lost.
    pub async fn sync_and_restart(
        &self,
        nodes: &[NodeName],
        bundle: &CertificateBundle,
        mode: WaitMode,
    ) -> Result<SyncRunReport> {
        let sync = self.distribute(nodes, bundle).await?;

        if sync.accepted.is_empty() {
            tracing::warn!("No node accepted the certificates, skipping restart");
            return Ok(SyncRunReport {
                sync,
                ..Default::default()
            });
        }

        tracing::info!("Restarting daemon on the nodes in order to reload the certificates...");
        match self.restarter.restart(&sync.accepted, mode).await {
            Ok(restart) => Ok(SyncRunReport {
                sync,
                restart: Some(restart),
                restart_error: None,
            }),
            Err(e) if e.is_communication() => {
                tracing::error!("Unable to restart daemon: {}", e);
                Ok(SyncRunReport {
                    sync,
                    restart: None,
                    restart_error: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{OperationStatus, SignatureReply};
    use crate::restart::testing::{failed, ok, response, CountingClock, FakeChannel, ScriptedSignatures};
    use crate::restart::{Outcome, VerifyPolicy};

    fn nodes(names: &[&str]) -> Vec<NodeName> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn bundle() -> CertificateBundle {
        CertificateBundle {
            cert: "CERT".into(),
            key: "KEY".into(),
        }
    }

    #[tokio::test]
    async fn test_communication_failure_never_restarts() {
        let channel = FakeChannel::new()
            .fail(Command::DistributeCertificates)
            .reply(Command::RestartDaemon, response(vec![]));
        let signatures = ScriptedSignatures::new();
        let clock = CountingClock::new();
        let restarter = RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());
        let sync = CertificateSync::new(&channel, &restarter);

        let err = sync
            .sync_and_restart(&nodes(&["A", "B"]), &bundle(), WaitMode::Wait)
            .await
            .unwrap_err();

        assert!(err.is_communication());
        assert!(channel.calls(Command::RestartDaemon).is_empty());
    }

    #[tokio::test]
    async fn test_restarts_only_accepting_nodes() {
        let channel = FakeChannel::new()
            .reply(
                Command::DistributeCertificates,
                response(vec![
                    ("A", ok("Success", None)),
                    ("B", failed("Unable to save certificate")),
                    ("C", ok("Success", None)),
                ]),
            )
            .reply(
                Command::RestartDaemon,
                response(vec![("A", ok("Success", Some("a0"))), ("C", ok("Success", Some("c0")))]),
            );
        let signatures = ScriptedSignatures::new()
            .script("A", vec![SignatureReply::Signature("a1".into())])
            .script("C", vec![SignatureReply::Signature("c1".into())]);
        let clock = CountingClock::new();
        let restarter = RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());
        let sync = CertificateSync::new(&channel, &restarter);

        let report = sync
            .sync_and_restart(&nodes(&["A", "B", "C"]), &bundle(), WaitMode::Wait)
            .await
            .unwrap();

        assert_eq!(report.sync.accepted, nodes(&["A", "C"]));
        assert_eq!(report.sync.rejected["B"], "Unable to save certificate");
        assert_eq!(channel.calls(Command::RestartDaemon), vec![nodes(&["A", "C"])]);

        let restart = report.restart.as_ref().unwrap();
        assert_eq!(restart.outcome("A"), Some(&Outcome::Restarted { verified: true }));
        assert_eq!(restart.outcome("C"), Some(&Outcome::Restarted { verified: true }));
        assert!(!restart.is_failed());
        // B's rejection still fails the run
        assert!(report.is_failed());
    }

    #[tokio::test]
    async fn test_all_rejected_short_circuits() {
        let channel = FakeChannel::new().reply(
            Command::DistributeCertificates,
            response(vec![("A", failed("denied")), ("B", failed("denied"))]),
        );
        let signatures = ScriptedSignatures::new();
        let clock = CountingClock::new();
        let restarter = RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());
        let sync = CertificateSync::new(&channel, &restarter);

        let report = sync
            .sync_and_restart(&nodes(&["A", "B"]), &bundle(), WaitMode::Wait)
            .await
            .unwrap();

        assert!(report.restart.is_none());
        assert!(report.is_failed());
        assert!(channel.calls(Command::RestartDaemon).is_empty());
    }

    #[tokio::test]
    async fn test_operation_error_keeps_acceptances() {
        let mut reply = response(vec![("A", ok("Success", None))]);
        reply.status = OperationStatus::Error;
        reply.text = "Some nodes were not reachable".into();

        let channel = FakeChannel::new().reply(Command::DistributeCertificates, reply);
        let signatures = ScriptedSignatures::new();
        let clock = CountingClock::new();
        let restarter = RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());
        let sync = CertificateSync::new(&channel, &restarter);

        let outcome = sync.distribute(&nodes(&["A", "B"]), &bundle()).await.unwrap();
        assert_eq!(outcome.accepted, nodes(&["A"]));
        assert_eq!(outcome.operation_error.as_deref(), Some("Some nodes were not reachable"));
        assert!(outcome.any_failed());
    }

    #[tokio::test]
    async fn test_missing_nodes_are_rejected() {
        let channel = FakeChannel::new()
            .reply(
                Command::DistributeCertificates,
                response(vec![("A", ok("Success", None))]),
            )
            .reply(
                Command::RestartDaemon,
                response(vec![("A", ok("Success", None))]),
            );
        let signatures = ScriptedSignatures::new();
        let clock = CountingClock::new();
        let restarter = RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());
        let sync = CertificateSync::new(&channel, &restarter);

        let report = sync
            .sync_and_restart(&nodes(&["A", "B"]), &bundle(), WaitMode::Wait)
            .await
            .unwrap();

        assert_eq!(report.sync.accepted, nodes(&["A"]));
        assert_eq!(report.sync.rejected["B"], "No response from node");
        assert_eq!(channel.calls(Command::RestartDaemon), vec![nodes(&["A"])]);
        assert!(report.is_failed());
    }

    #[tokio::test]
    async fn test_missing_node_status_is_malformed() {
        let channel = FakeChannel::new()
            .reply_json(Command::DistributeCertificates, r#"{"status": "ok"}"#)
            .reply(Command::RestartDaemon, response(vec![]));
        let signatures = ScriptedSignatures::new();
        let clock = CountingClock::new();
        let restarter = RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());
        let sync = CertificateSync::new(&channel, &restarter);

        let err = sync
            .sync_and_restart(&nodes(&["A", "B"]), &bundle(), WaitMode::Wait)
            .await
            .unwrap_err();

        assert!(matches!(err, crate::error::Error::MalformedResponse(_)));
        assert!(err.is_communication());
        assert!(channel.calls(Command::RestartDaemon).is_empty());
    }

    #[tokio::test]
    async fn test_restart_failure_keeps_sync_results() {
        let channel = FakeChannel::new()
            .reply(
                Command::DistributeCertificates,
                response(vec![("A", ok("Success", None)), ("B", failed("denied"))]),
            )
            .fail(Command::RestartDaemon);
        let signatures = ScriptedSignatures::new();
        let clock = CountingClock::new();
        let restarter = RestartCoordinator::new(&channel, &signatures, &clock, VerifyPolicy::default());
        let sync = CertificateSync::new(&channel, &restarter);

        let report = sync
            .sync_and_restart(&nodes(&["A", "B"]), &bundle(), WaitMode::Wait)
            .await
            .unwrap();

        assert_eq!(report.sync.accepted, nodes(&["A"]));
        assert_eq!(report.sync.rejected["B"], "denied");
        assert!(report.restart.is_none());
        assert!(report.restart_error.is_some());
        assert!(report.is_failed());
    }
}
