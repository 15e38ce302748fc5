use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::models::replica::ReplicaSetRecord;
use crate::models::replica::SpId;

const CHAIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The chain as seen by this node: an oracle for service-provider identities
/// and replica-set records, plus the single write we ever issue (a
/// replica-set update proposal).
///
/// The real contract client lives outside this repository; everything here
/// programs against the trait.
#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    /// The service-provider id registered for `endpoint`, if any.
    async fn service_provider_id(&self, endpoint: &str) -> Result<Option<SpId>>;

    /// Whether the replica-set registry contract has been deployed yet.
    async fn replica_set_registry_deployed(&self) -> Result<bool>;

    /// Register this node on the replica-set registry.
    async fn register_service_provider(&self, sp_id: SpId, endpoint: &str) -> Result<()>;

    /// The current replica set of `wallet`, if the user is known on chain.
    async fn replica_set(&self, wallet: &str) -> Result<Option<ReplicaSetRecord>>;

    /// The advertised endpoint of a service provider.
    async fn endpoint_for(&self, sp_id: SpId) -> Result<Option<String>>;

    /// All registered content nodes, `(sp_id, endpoint)` pairs.
    async fn content_nodes(&self) -> Result<Vec<(SpId, String)>>;

    /// Propose replacing a user's replica set. Proposals are idempotent on
    /// chain; re-submitting an identical set is a no-op.
    async fn propose_replica_set_update(
        &self,
        wallet: &str,
        new_set: ReplicaSetRecord,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
struct DevChainState {
    nodes: BTreeMap<SpId, String>,
    replica_sets: BTreeMap<String, ReplicaSetRecord>,
    registry_deployed: bool,
}

/// In-process chain used in dev mode and tests. State is mutated through the
/// same operations the real contracts expose, so the bootstrap and snapback
/// flows run unchanged against it.
#[derive(Debug, Default)]
pub struct DevChainClient {
    state: Mutex<DevChainState>,
}

impl DevChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain that already knows `endpoint` under `sp_id` and has the
    /// registry deployed, so a dev node bootstraps immediately.
    pub async fn with_registered_node(sp_id: SpId, endpoint: &str) -> Self {
        let client = Self::new();
        client.add_content_node(sp_id, endpoint).await;
        client.deploy_registry().await;
        client
    }

    pub async fn add_content_node(&self, sp_id: SpId, endpoint: &str) {
        self.state
            .lock()
            .await
            .nodes
            .insert(sp_id, endpoint.to_string());
    }

    pub async fn deploy_registry(&self) {
        self.state.lock().await.registry_deployed = true;
    }

    pub async fn set_replica_set(&self, wallet: &str, record: ReplicaSetRecord) {
        self.state
            .lock()
            .await
            .replica_sets
            .insert(wallet.to_string(), record);
    }
}

#[async_trait]
impl ChainClient for DevChainClient {
    async fn service_provider_id(&self, endpoint: &str) -> Result<Option<SpId>> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .find(|(_, node_endpoint)| node_endpoint.as_str() == endpoint)
            .map(|(sp_id, _)| *sp_id))
    }

    async fn replica_set_registry_deployed(&self) -> Result<bool> {
        Ok(self.state.lock().await.registry_deployed)
    }

    async fn register_service_provider(&self, sp_id: SpId, endpoint: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .nodes
            .insert(sp_id, endpoint.to_string());
        Ok(())
    }

    async fn replica_set(&self, wallet: &str) -> Result<Option<ReplicaSetRecord>> {
        Ok(self.state.lock().await.replica_sets.get(wallet).copied())
    }

    async fn endpoint_for(&self, sp_id: SpId) -> Result<Option<String>> {
        Ok(self.state.lock().await.nodes.get(&sp_id).cloned())
    }

    async fn content_nodes(&self) -> Result<Vec<(SpId, String)>> {
        Ok(self
            .state
            .lock()
            .await
            .nodes
            .iter()
            .map(|(sp_id, endpoint)| (*sp_id, endpoint.clone()))
            .collect())
    }

    async fn propose_replica_set_update(
        &self,
        wallet: &str,
        new_set: ReplicaSetRecord,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .replica_sets
            .insert(wallet.to_string(), new_set);
        Ok(())
    }
}

#[derive(Deserialize)]
struct SpIdBody {
    sp_id: Option<SpId>,
}

#[derive(Deserialize)]
struct RegistryBody {
    deployed: bool,
}

#[derive(Deserialize)]
struct NodeEntryBody {
    sp_id: SpId,
    endpoint: String,
}

/// Chain client backed by a chain-gateway HTTP API. Every request carries an
/// explicit timeout; callers (the bootstrap and snapback loops) already
/// retry, so transient gateway failures surface as plain errors.
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    http: reqwest::Client,
    chain_endpoint: String,
}

impl HttpChainClient {
    pub fn new(chain_endpoint: String) -> Self {
        HttpChainClient {
            http: reqwest::Client::new(),
            chain_endpoint,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.chain_endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn service_provider_id(&self, endpoint: &str) -> Result<Option<SpId>> {
        let response = self
            .http
            .get(self.url("service_providers/id"))
            .query(&[("endpoint", endpoint)])
            .timeout(CHAIN_REQUEST_TIMEOUT)
            .send()
            .await
            .context("service-provider lookup failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: SpIdBody = response
            .error_for_status()
            .context("service-provider lookup rejected")?
            .json()
            .await
            .context("service-provider lookup returned malformed body")?;
        Ok(body.sp_id.filter(|sp_id| *sp_id != 0))
    }

    async fn replica_set_registry_deployed(&self) -> Result<bool> {
        let body: RegistryBody = self
            .http
            .get(self.url("replica_set_registry"))
            .timeout(CHAIN_REQUEST_TIMEOUT)
            .send()
            .await
            .context("registry deployment check failed")?
            .error_for_status()
            .context("registry deployment check rejected")?
            .json()
            .await
            .context("registry deployment check returned malformed body")?;
        Ok(body.deployed)
    }

    async fn register_service_provider(&self, sp_id: SpId, endpoint: &str) -> Result<()> {
        self.http
            .post(self.url("replica_set_registry/register"))
            .json(&serde_json::json!({ "sp_id": sp_id, "endpoint": endpoint }))
            .timeout(CHAIN_REQUEST_TIMEOUT)
            .send()
            .await
            .context("registry registration failed")?
            .error_for_status()
            .context("registry registration rejected")?;
        Ok(())
    }

    async fn replica_set(&self, wallet: &str) -> Result<Option<ReplicaSetRecord>> {
        let response = self
            .http
            .get(self.url(&format!("users/{wallet}/replica_set")))
            .timeout(CHAIN_REQUEST_TIMEOUT)
            .send()
            .await
            .context("replica-set lookup failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = response
            .error_for_status()
            .context("replica-set lookup rejected")?
            .json()
            .await
            .context("replica-set lookup returned malformed body")?;
        Ok(Some(record))
    }

    async fn endpoint_for(&self, sp_id: SpId) -> Result<Option<String>> {
        let response = self
            .http
            .get(self.url(&format!("service_providers/{sp_id}")))
            .timeout(CHAIN_REQUEST_TIMEOUT)
            .send()
            .await
            .context("endpoint lookup failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: NodeEntryBody = response
            .error_for_status()
            .context("endpoint lookup rejected")?
            .json()
            .await
            .context("endpoint lookup returned malformed body")?;
        Ok(Some(body.endpoint))
    }

    async fn content_nodes(&self) -> Result<Vec<(SpId, String)>> {
        let body: Vec<NodeEntryBody> = self
            .http
            .get(self.url("service_providers"))
            .timeout(CHAIN_REQUEST_TIMEOUT)
            .send()
            .await
            .context("content-node listing failed")?
            .error_for_status()
            .context("content-node listing rejected")?
            .json()
            .await
            .context("content-node listing returned malformed body")?;
        Ok(body
            .into_iter()
            .map(|node| (node.sp_id, node.endpoint))
            .collect())
    }

    async fn propose_replica_set_update(
        &self,
        wallet: &str,
        new_set: ReplicaSetRecord,
    ) -> Result<()> {
        self.http
            .post(self.url(&format!("users/{wallet}/replica_set")))
            .json(&new_set)
            .timeout(CHAIN_REQUEST_TIMEOUT)
            .send()
            .await
            .context("replica-set proposal failed")?
            .error_for_status()
            .context("replica-set proposal rejected")?;
        Ok(())
    }
}

#[cfg(test)]
mod chain_tests {
    use super::*;

    #[tokio::test]
    async fn dev_chain_resolves_endpoints_both_ways() {
        let chain = DevChainClient::with_registered_node(3, "http://cn3.audius.co").await;
        assert_eq!(
            Some(3),
            chain.service_provider_id("http://cn3.audius.co").await.unwrap()
        );
        assert_eq!(
            Some("http://cn3.audius.co".to_string()),
            chain.endpoint_for(3).await.unwrap()
        );
        assert_eq!(None, chain.service_provider_id("http://unknown").await.unwrap());
        assert!(chain.replica_set_registry_deployed().await.unwrap());
    }

    #[tokio::test]
    async fn proposals_overwrite_the_replica_set() {
        let chain = DevChainClient::new();
        let original = ReplicaSetRecord {
            primary_sp_id: 1,
            secondary1_sp_id: 2,
            secondary2_sp_id: 3,
        };
        chain.set_replica_set("0xaa", original).await;

        let proposed = original.with_secondary_replaced(3, 9);
        chain.propose_replica_set_update("0xaa", proposed).await.unwrap();
        assert_eq!(Some(proposed), chain.replica_set("0xaa").await.unwrap());
    }

    /// A minimal chain gateway serving the routes [`HttpChainClient`] reads.
    async fn spawn_mock_gateway() -> String {
        use axum::extract::Path;
        use axum::extract::Query;
        use axum::response::IntoResponse;
        use axum::routing::get;
        use axum::Json;
        use axum::Router;
        use serde_json::json;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let router = Router::new()
            .route(
                "/service_providers/id",
                get(
                    |Query(params): Query<std::collections::HashMap<String, String>>| async move {
                        if params.get("endpoint").map(String::as_str)
                            == Some("http://cn7.audius.co")
                        {
                            Json(json!({ "sp_id": 7 }))
                        } else {
                            Json(json!({ "sp_id": null }))
                        }
                    },
                ),
            )
            .route(
                "/replica_set_registry",
                get(|| async { Json(json!({ "deployed": true })) }),
            )
            .route(
                "/users/:wallet/replica_set",
                get(|Path(wallet): Path<String>| async move {
                    if wallet == "0xaa" {
                        Json(json!({
                            "primary_sp_id": 1,
                            "secondary1_sp_id": 2,
                            "secondary2_sp_id": 3,
                        }))
                        .into_response()
                    } else {
                        StatusCode::NOT_FOUND.into_response()
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        endpoint
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_client_parses_gateway_responses() {
        let gateway = spawn_mock_gateway().await;
        let chain = HttpChainClient::new(gateway);

        assert_eq!(
            Some(7),
            chain
                .service_provider_id("http://cn7.audius.co")
                .await
                .unwrap()
        );
        assert_eq!(
            None,
            chain.service_provider_id("http://unknown").await.unwrap()
        );
        assert!(chain.replica_set_registry_deployed().await.unwrap());
        assert_eq!(
            Some(ReplicaSetRecord {
                primary_sp_id: 1,
                secondary1_sp_id: 2,
                secondary2_sp_id: 3,
            }),
            chain.replica_set("0xaa").await.unwrap()
        );
        assert_eq!(None, chain.replica_set("0xbb").await.unwrap());
    }
}
