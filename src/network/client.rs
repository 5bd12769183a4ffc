//! Network Client
//!
//! HTTP client for the local management daemon and for direct node checks.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{
    Command, CommandChannel, CommandPayload, OperationResponse, SignatureReply, SignatureSource,
};
use crate::config::{ClusterCtlConfig, HostConfig};
use crate::error::{Error, Result};

/// Reply envelope of the local daemon's CLI endpoint
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    status_msg: Option<String>,
    #[serde(default)]
    data: Option<OperationResponse>,
}

impl Envelope {
    fn into_response(self) -> Result<OperationResponse> {
        if self.status != "ok" {
            return Err(Error::Communication(
                self.status_msg.unwrap_or(self.status),
            ));
        }
        self.data
            .ok_or_else(|| Error::MalformedResponse("reply carries no data".into()))
    }
}

/// HTTP implementation of the daemon channel and the signature check
pub struct HttpChannel {
    client: reqwest::Client,
    /// Local daemon endpoint
    endpoint: String,
    /// Known hosts: node -> address, port, token
    hosts: BTreeMap<String, HostConfig>,
    /// Port for nodes without an explicit one
    default_port: u16,
}

impl HttpChannel {
    /// Create a new channel
    pub fn new(
        endpoint: impl Into<String>,
        hosts: BTreeMap<String, HostConfig>,
        default_port: u16,
        request_timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            hosts,
            default_port,
        })
    }

    /// Create a channel from configuration
    pub fn from_config(config: &ClusterCtlConfig) -> Result<Self> {
        Self::new(
            config.daemon.endpoint.clone(),
            config.hosts.clone(),
            config.daemon.port,
            config.request_timeout(),
            config.daemon.accept_invalid_certs,
        )
    }

    /// URL of the signature check on a node
    fn signature_url(&self, node: &str) -> String {
        let host = self.hosts.get(node);
        let address = host
            .and_then(|h| h.address.as_deref())
            .unwrap_or(node);
        let port = host.and_then(|h| h.port).unwrap_or(self.default_port);

        // Bracket bare IPv6 literals
        let address = if address.contains(':') && !address.starts_with('[') {
            format!("[{}]", address)
        } else {
            address.to_string()
        };

        format!("https://{}:{}/remote/instance_signature", address, port)
    }

    fn token(&self, node: &str) -> Option<&str> {
        self.hosts.get(node).and_then(|h| h.token.as_deref())
    }
}

#[async_trait]
impl CommandChannel for HttpChannel {
    async fn invoke(&self, command: Command, payload: &CommandPayload) -> Result<OperationResponse> {
        let url = format!("{}/cli/{}", self.endpoint, command);
        tracing::debug!("Sending {} for {:?} to {}", command, payload.nodes, url);

        let response = self.client.post(&url).json(payload).send().await?;

        if !response.status().is_success() {
            return Err(Error::Communication(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let envelope: Envelope = response.json().await?;
        envelope.into_response()
    }
}

#[async_trait]
impl SignatureSource for HttpChannel {
    async fn query_signature(&self, node: &str) -> SignatureReply {
        let Some(token) = self.token(node) else {
            return SignatureReply::NotAuthorized(format!(
                "{}: Unable to authenticate, no token available",
                node
            ));
        };

        let url = self.signature_url(node);
        let result = self
            .client
            .get(&url)
            .header(reqwest::header::COOKIE, format!("token={}", token))
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("No response from {}: {}", node, e);
                return SignatureReply::Unreachable(format!("{}: {}", node, e));
            }
        };

        match response.status() {
            StatusCode::OK => match response.text().await {
                Ok(body) => SignatureReply::Signature(body.trim().to_string()),
                Err(e) => SignatureReply::Unreachable(format!("{}: {}", node, e)),
            },
            StatusCode::UNAUTHORIZED => {
                SignatureReply::NotAuthorized(format!("{}: Unable to authenticate", node))
            }
            StatusCode::FORBIDDEN => {
                SignatureReply::PermissionDenied(format!("{}: Permission denied", node))
            }
            status => SignatureReply::Unreachable(format!("{}: HTTP {}", node, status)),
        }
    }
}
