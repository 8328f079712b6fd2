//! Weight Publisher boundary
//!
//! Receives the identity → score vector of a pass. The consensus-layer
//! transaction itself lives outside this service; the HTTP publisher hands the
//! vector to whatever submits it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::api::http::{HttpSecurityConfig, SecureHttpClient};
use crate::config::PublisherConfig;

#[async_trait]
pub trait WeightPublisher: Send + Sync {
    async fn publish(&self, weights: &BTreeMap<String, f64>) -> Result<()>;
}

/// Logs the vector; used when no endpoint is configured
#[derive(Debug, Default)]
pub struct LogWeightPublisher;

#[async_trait]
impl WeightPublisher for LogWeightPublisher {
    async fn publish(&self, weights: &BTreeMap<String, f64>) -> Result<()> {
        for (identity, weight) in weights {
            info!(identity = %identity, weight = weight, "Weight");
        }
        info!(identities = weights.len(), "Weights computed (log publisher)");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WeightEntry<'a> {
    identity: &'a str,
    weight: f64,
}

#[derive(Debug, Serialize)]
struct WeightSubmission<'a> {
    netuid: u16,
    version_key: u64,
    weights: Vec<WeightEntry<'a>>,
}

/// POSTs the vector as JSON to a submission endpoint
pub struct HttpWeightPublisher {
    http: SecureHttpClient,
    endpoint: String,
    api_key: Option<String>,
    netuid: u16,
    version_key: u64,
}

impl HttpWeightPublisher {
    pub fn new(config: &PublisherConfig, require_https: bool) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .context("Publisher endpoint is not configured")?;

        let http = SecureHttpClient::new(HttpSecurityConfig {
            require_https,
            timeout_secs: config.timeout_secs,
            ..Default::default()
        })?;
        http.validate_url(&endpoint)?;

        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            netuid: config.netuid,
            version_key: config.version_key,
        })
    }
}

#[async_trait]
impl WeightPublisher for HttpWeightPublisher {
    async fn publish(&self, weights: &BTreeMap<String, f64>) -> Result<()> {
        let submission = WeightSubmission {
            netuid: self.netuid,
            version_key: self.version_key,
            weights: weights
                .iter()
                .map(|(identity, weight)| WeightEntry {
                    identity,
                    weight: *weight,
                })
                .collect(),
        };

        self.http
            .post_json(&self.endpoint, &submission, self.api_key.as_deref())
            .await
            .context("Weight submission failed")?;

        info!(
            identities = weights.len(),
            netuid = self.netuid,
            "Weights submitted"
        );
        Ok(())
    }
}
