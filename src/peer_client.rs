use std::time::Duration;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::models::export::ExportEnvelope;
use crate::models::export::ExportPayload;
use crate::models::sync::SyncError;
use crate::models::sync::SyncJobParams;

/// Export pulls may move a user's full history; everything else is small.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const CONTENT_FETCH_FLOOR: Duration = Duration::from_secs(1);
/// Extra fetch allowance per declared byte, when a size hint exists.
const CONTENT_FETCH_BYTES_PER_SEC: u64 = 1_000_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClockStatusResponse {
    pub clock: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncTriggerResponse {
    pub job_id: Uuid,
}

/// HTTP client for replica-to-replica traffic: export pulls, clock probes,
/// content fetches and sync triggers. Every request has an explicit timeout.
#[derive(Clone, Debug)]
pub struct PeerClient {
    http: reqwest::Client,
    own_endpoint: String,
}

impl PeerClient {
    pub fn new(own_endpoint: String) -> Self {
        PeerClient {
            http: reqwest::Client::new(),
            own_endpoint,
        }
    }

    /// Pull an export slice starting at `clock_range_min` from `peer`.
    pub async fn fetch_export(
        &self,
        peer: &str,
        wallets: &[String],
        clock_range_min: u64,
    ) -> Result<ExportPayload, SyncError> {
        let mut query: Vec<(&str, String)> = wallets
            .iter()
            .map(|wallet| ("wallet_public_key", wallet.clone()))
            .collect();
        query.push(("clock_range_min", clock_range_min.to_string()));
        query.push(("source_endpoint", self.own_endpoint.clone()));

        let response = self
            .http
            .get(endpoint_url(peer, "export"))
            .query(&query)
            .timeout(EXPORT_TIMEOUT)
            .send()
            .await
            .map_err(|e| SyncError::ExportInvalid(format!("request to {peer} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::ExportInvalid(format!(
                "{peer} answered export with status {status}"
            )));
        }

        let envelope: ExportEnvelope = response.json().await.map_err(|e| {
            SyncError::ExportInvalid(format!("{peer} returned malformed export: {e}"))
        })?;
        Ok(envelope.data)
    }

    /// Lightweight probe for a peer's current clock of one user.
    pub async fn clock_status(&self, peer: &str, wallet: &str) -> Result<i64> {
        let response = self
            .http
            .get(endpoint_url(peer, &format!("users/clock_status/{wallet}")))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("clock probe to {peer} failed"))?
            .error_for_status()
            .with_context(|| format!("clock probe to {peer} rejected"))?;

        let parsed: ClockStatusResponse = response
            .json()
            .await
            .with_context(|| format!("clock probe to {peer} returned malformed body"))?;
        Ok(parsed.clock)
    }

    /// Fetch content bytes by multihash. The timeout grows with the declared
    /// file size so large segments are not condemned by the 1-second floor.
    pub async fn fetch_content(
        &self,
        peer: &str,
        multihash: &str,
        size_hint: Option<u64>,
    ) -> Result<Bytes> {
        self.fetch_bytes(peer, &format!("ipfs/{multihash}"), size_hint)
            .await
    }

    /// Directory-form fetch for image files addressed by directory hash and
    /// file name.
    pub async fn fetch_dir_content(
        &self,
        peer: &str,
        dir_multihash: &str,
        file_name: &str,
        size_hint: Option<u64>,
    ) -> Result<Bytes> {
        self.fetch_bytes(peer, &format!("ipfs/{dir_multihash}/{file_name}"), size_hint)
            .await
    }

    /// Ask a secondary to enqueue a sync against us.
    pub async fn request_sync(&self, peer: &str, params: &SyncJobParams) -> Result<Uuid> {
        let response = self
            .http
            .post(endpoint_url(peer, "sync"))
            .json(params)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("sync trigger to {peer} failed"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{peer} rejected sync trigger with status {status}"));
        }
        let parsed: SyncTriggerResponse = response
            .json()
            .await
            .with_context(|| format!("sync trigger to {peer} returned malformed body"))?;
        Ok(parsed.job_id)
    }

    async fn fetch_bytes(&self, peer: &str, path: &str, size_hint: Option<u64>) -> Result<Bytes> {
        let response = self
            .http
            .get(endpoint_url(peer, path))
            .timeout(content_fetch_timeout(size_hint))
            .send()
            .await
            .with_context(|| format!("content fetch from {peer} failed"))?
            .error_for_status()
            .with_context(|| format!("content fetch from {peer} rejected"))?;
        response
            .bytes()
            .await
            .with_context(|| format!("content fetch from {peer} truncated"))
    }
}

fn endpoint_url(peer: &str, path: &str) -> String {
    format!("{}/{path}", peer.trim_end_matches('/'))
}

fn content_fetch_timeout(size_hint: Option<u64>) -> Duration {
    match size_hint {
        Some(bytes) => {
            CONTENT_FETCH_FLOOR + Duration::from_secs(bytes / CONTENT_FETCH_BYTES_PER_SEC)
        }
        None => CONTENT_FETCH_FLOOR,
    }
}

#[cfg(test)]
mod peer_client_tests {
    use super::*;

    #[test]
    fn urls_tolerate_trailing_slashes() {
        assert_eq!(
            "http://cn1.audius.co/export",
            endpoint_url("http://cn1.audius.co/", "export")
        );
        assert_eq!(
            "http://cn1.audius.co/ipfs/abc",
            endpoint_url("http://cn1.audius.co", "ipfs/abc")
        );
    }

    #[test]
    fn fetch_timeout_scales_with_declared_size() {
        assert_eq!(Duration::from_secs(1), content_fetch_timeout(None));
        assert_eq!(Duration::from_secs(1), content_fetch_timeout(Some(1_000)));
        assert_eq!(
            Duration::from_secs(6),
            content_fetch_timeout(Some(5_000_000))
        );
    }
}
