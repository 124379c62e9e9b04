use chrono::Utc;
use hub_domain::{InstanceId, Snowflake};
use hub_store::{FederationToken, StateStore, StoreError};
use thiserror::Error;

use crate::secrets;

#[derive(Debug, Error)]
pub enum FederationError {
    #[error("invalid or already-redeemed bootstrap token")]
    InvalidToken,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Exchange a one-time bootstrap token for a long-lived federation token.
///
/// Called from the hub's call-home handler the first time an instance
/// registers back. The bootstrap hash is consumed atomically, so a replay
/// of the same token fails; only the new token's hash is stored.
pub async fn redeem_bootstrap_token(
    store: &dyn StateStore,
    ids: &Snowflake,
    instance_id: InstanceId,
    bootstrap_token: &str,
) -> Result<String, FederationError> {
    let presented_hash = secrets::sha256_hex(bootstrap_token.as_bytes());
    if !store
        .consume_bootstrap_token_hash(instance_id, &presented_hash)
        .await?
    {
        return Err(FederationError::InvalidToken);
    }

    let token = secrets::random_token();
    store
        .insert_federation_token(&FederationToken {
            id: ids.next_id(),
            instance_id,
            token_hash: secrets::sha256_hex(token.as_bytes()),
            created_at: Utc::now(),
            revoked_at: None,
        })
        .await?;
    Ok(token)
}

/// Resolve a presented federation token to its instance, if valid.
pub async fn authenticate_federation_token(
    store: &dyn StateStore,
    token: &str,
) -> Result<Option<InstanceId>, StoreError> {
    let hash = secrets::sha256_hex(token.as_bytes());
    Ok(store
        .find_federation_token(&hash)
        .await?
        .map(|t| t.instance_id))
}
