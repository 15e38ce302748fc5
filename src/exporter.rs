use std::collections::BTreeMap;

use tracing::info;
use tracing::warn;

use crate::chain::ChainClient;
use crate::clock_log::ClockLogStore;
use crate::models::export::ExportPayload;
use crate::models::export::ExportedUser;
use crate::models::export::IpfsIdentity;
use crate::models::sync::SyncError;

#[derive(Clone, Debug)]
pub struct ExportParams {
    pub wallets: Vec<String>,
    pub clock_range_min: u64,
    /// Endpoint of the requesting node. When present, the request is only
    /// honored if that node sits in the user's replica set.
    pub source_endpoint: Option<String>,
}

/// Assemble the export payload for a set of wallets: per wallet the user
/// record, the contiguous clock-record slice starting at `clock_range_min`,
/// and the entity rows that slice references.
///
/// Unknown wallets are omitted from the payload; a known wallet queried
/// beyond its tip appears with empty `clock_records`.
pub async fn build_export(
    clock_log: &ClockLogStore,
    chain: &dyn ChainClient,
    own_endpoint: &str,
    export_window: u64,
    params: ExportParams,
) -> Result<ExportPayload, SyncError> {
    let mut cnode_users = BTreeMap::new();

    for wallet in &params.wallets {
        if let Some(source_endpoint) = &params.source_endpoint {
            verify_replica_membership(chain, wallet, source_endpoint).await?;
        }

        let Some(slice) = clock_log
            .slice(wallet, params.clock_range_min, export_window)
            .await?
        else {
            warn!("export requested for unknown wallet {wallet}");
            continue;
        };

        info!(
            "exporting {} clock records of {wallet} starting at {} to {}",
            slice.clock_records.len(),
            params.clock_range_min,
            params.source_endpoint.as_deref().unwrap_or("<unknown>"),
        );
        cnode_users.insert(
            wallet.clone(),
            ExportedUser {
                user: slice.user,
                clock_records: slice.clock_records,
                files: slice.files,
                tracks: slice.tracks,
                audius_users: slice.audius_users,
            },
        );
    }

    Ok(ExportPayload {
        cnode_users,
        ipfs_id_obj: IpfsIdentity {
            addresses: vec![own_endpoint.to_string()],
        },
    })
}

/// A peer may only export users it actually replicates. Users without an
/// on-chain replica set yet are exportable by anyone; their set is still
/// being negotiated.
async fn verify_replica_membership(
    chain: &dyn ChainClient,
    wallet: &str,
    source_endpoint: &str,
) -> Result<(), SyncError> {
    let Some(replica_set) = chain
        .replica_set(wallet)
        .await
        .map_err(|e| SyncError::Db(format!("replica-set lookup failed: {e}")))?
    else {
        return Ok(());
    };

    for sp_id in replica_set.members() {
        let endpoint = chain
            .endpoint_for(sp_id)
            .await
            .map_err(|e| SyncError::Db(format!("endpoint lookup failed: {e}")))?;
        if endpoint.as_deref() == Some(source_endpoint) {
            return Ok(());
        }
    }

    Err(SyncError::ExportInvalid(format!(
        "{source_endpoint} is not in the replica set of {wallet}"
    )))
}

#[cfg(test)]
mod exporter_tests {
    use super::*;
    use crate::chain::DevChainClient;
    use crate::models::replica::ReplicaSetRecord;
    use crate::tests::shared::test_clock_log_store;
    use crate::tests::shared::track_file_mutation;

    const WALLET: &str = "0xaa";
    const OWN_ENDPOINT: &str = "http://cn1.audius.co";

    async fn seeded_chain() -> DevChainClient {
        let chain = DevChainClient::with_registered_node(1, OWN_ENDPOINT).await;
        chain.add_content_node(2, "http://cn2.audius.co").await;
        chain.add_content_node(3, "http://cn3.audius.co").await;
        chain.add_content_node(4, "http://cn4.audius.co").await;
        chain
            .set_replica_set(
                WALLET,
                ReplicaSetRecord {
                    primary_sp_id: 1,
                    secondary1_sp_id: 2,
                    secondary2_sp_id: 3,
                },
            )
            .await;
        chain
    }

    #[tokio::test]
    async fn export_contains_requested_slice() {
        let (store, _dir) = test_clock_log_store().await;
        store
            .append(
                WALLET,
                -1,
                vec![track_file_mutation("a"), track_file_mutation("b")],
            )
            .await
            .unwrap();
        let chain = seeded_chain().await;

        let payload = build_export(
            &store,
            &chain,
            OWN_ENDPOINT,
            10_000,
            ExportParams {
                wallets: vec![WALLET.to_string()],
                clock_range_min: 0,
                source_endpoint: Some("http://cn2.audius.co".to_string()),
            },
        )
        .await
        .unwrap();

        let exported = payload.cnode_users.get(WALLET).unwrap();
        assert_eq!(1, exported.user.clock);
        assert_eq!(2, exported.clock_records.len());
        assert!(exported.clock_records_are_dense());
        assert_eq!(vec![OWN_ENDPOINT.to_string()], payload.ipfs_id_obj.addresses);
    }

    #[tokio::test]
    async fn foreign_nodes_are_rejected() {
        let (store, _dir) = test_clock_log_store().await;
        store
            .append(WALLET, -1, vec![track_file_mutation("a")])
            .await
            .unwrap();
        let chain = seeded_chain().await;

        let result = build_export(
            &store,
            &chain,
            OWN_ENDPOINT,
            10_000,
            ExportParams {
                wallets: vec![WALLET.to_string()],
                clock_range_min: 0,
                source_endpoint: Some("http://cn4.audius.co".to_string()),
            },
        )
        .await;
        assert!(matches!(result, Err(SyncError::ExportInvalid(_))));
    }

    #[tokio::test]
    async fn unknown_wallets_are_omitted() {
        let (store, _dir) = test_clock_log_store().await;
        let chain = seeded_chain().await;

        let payload = build_export(
            &store,
            &chain,
            OWN_ENDPOINT,
            10_000,
            ExportParams {
                wallets: vec!["0xdoesnotexist".to_string()],
                clock_range_min: 0,
                source_endpoint: None,
            },
        )
        .await
        .unwrap();
        assert!(payload.cnode_users.is_empty());
    }
}
