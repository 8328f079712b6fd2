//! Federation client
//!
//! Each validator keeps its own authoritative mapping store. Finding
//! "everything bound under my identity anywhere" is a fan-out over the
//! validators' public endpoints, issued concurrently. A failing peer is
//! reported in its own result and never aborts the others.

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::api::http::{HttpSecurityConfig, SecureHttpClient};
use crate::api::registration::{
    BindResponse, RejectionBody, UnbindAllResponse, UnbindResponse, WorkersResponse,
};
use crate::registrar::{BindRequest, UnbindAllRequest, UnbindRequest};

/// Result of one request to one validator
#[derive(Debug, Clone, PartialEq)]
pub struct PeerResult<T> {
    pub peer: String,
    pub result: Result<T, String>,
}

pub struct PeerClient {
    http: SecureHttpClient,
    peers: Vec<String>,
}

impl PeerClient {
    pub fn new(peers: Vec<String>, timeout_secs: u64) -> Result<Self> {
        let http = SecureHttpClient::new(HttpSecurityConfig {
            timeout_secs,
            ..Default::default()
        })?;

        let peers = peers
            .into_iter()
            .map(|p| p.trim().trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>();

        for peer in &peers {
            http.validate_url(peer)?;
        }

        Ok(Self { http, peers })
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Bind the worker on every validator
    pub async fn bind(&self, request: &BindRequest) -> Vec<PeerResult<String>> {
        self.post_all::<_, BindResponse>("bind", request)
            .await
            .into_iter()
            .map(|r| PeerResult {
                peer: r.peer,
                result: r.result.map(|body| body.outcome),
            })
            .collect()
    }

    /// Unbind the worker on every validator
    pub async fn unbind(&self, request: &UnbindRequest) -> Vec<PeerResult<()>> {
        self.post_all::<_, UnbindResponse>("unbind", request)
            .await
            .into_iter()
            .map(|r| PeerResult {
                peer: r.peer,
                result: r.result.map(|_| ()),
            })
            .collect()
    }

    /// Remove every binding of the identity on every validator
    pub async fn unbind_all(&self, request: &UnbindAllRequest) -> Vec<PeerResult<u64>> {
        self.post_all::<_, UnbindAllResponse>("unbind_all", request)
            .await
            .into_iter()
            .map(|r| PeerResult {
                peer: r.peer,
                result: r.result.map(|body| body.removed_count),
            })
            .collect()
    }

    /// Workers bound to `identity`, per validator
    pub async fn list_workers(&self, identity: &str) -> Vec<PeerResult<Vec<String>>> {
        let requests = self.peers.iter().map(|peer| async move {
            let url = format!("{}/workers/{}", peer, identity);
            let result = match self.http.get_with_status(&url).await {
                Ok((status, body)) => decode::<WorkersResponse>(status, &body).map(|r| r.workers),
                Err(e) => Err(format!("{:#}", e)),
            };
            PeerResult {
                peer: peer.clone(),
                result,
            }
        });

        join_all(requests).await
    }

    /// Union of the identity's workers across validators, with the peers holding each
    pub async fn find_workers(&self, identity: &str) -> BTreeMap<String, Vec<String>> {
        let mut holders: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for peer_result in self.list_workers(identity).await {
            match peer_result.result {
                Ok(workers) => {
                    for worker in workers {
                        holders.entry(worker).or_default().push(peer_result.peer.clone());
                    }
                }
                Err(e) => warn!(peer = %peer_result.peer, error = %e, "Peer listing failed"),
            }
        }
        holders
    }

    async fn post_all<B, R>(&self, path: &str, body: &B) -> Vec<PeerResult<R>>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let requests = self.peers.iter().map(|peer| async move {
            let url = format!("{}/{}", peer, path);
            let result = match self.http.post_json_with_status(&url, body).await {
                Ok((status, text)) => decode::<R>(status, &text),
                Err(e) => Err(format!("{:#}", e)),
            };
            debug!(peer = %peer, path = %path, ok = result.is_ok(), "Peer request finished");
            PeerResult {
                peer: peer.clone(),
                result,
            }
        });

        join_all(requests).await
    }
}

/// Decode a success body, or turn a rejection body into its reason
fn decode<R: DeserializeOwned>(status: u16, body: &str) -> Result<R, String> {
    if (200..300).contains(&status) {
        return serde_json::from_str(body).map_err(|e| format!("malformed response: {}", e));
    }

    match serde_json::from_str::<RejectionBody>(body) {
        Ok(rejection) => Err(format!("{}: {}", rejection.reason, rejection.message)),
        Err(_) => Err(format!("HTTP {}", status)),
    }
}
