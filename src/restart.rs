//! Mutation tracking and restart coordination
//!
//! Every reconciliation pass aggregates a single "did this pass mutate remote
//! state" signal. A mutating pass ends with exactly one period commit, one
//! config write, one restart, and one freshly generated restart nonce in
//! leader storage. Followers observe nonce changes and restart their own
//! gateway once per change; a nonce already acted upon never triggers a
//! second restart.

use std::path::PathBuf;

use tracing::{debug, info};
use uuid::Uuid;

use crate::admin::{AdminOps, PeriodScope};
use crate::leader::{LeaderStore, RESTART_NONCE_KEY};
use crate::service::GatewayService;
use crate::Result;

/// Aggregates the mutation signal across the sub-steps of one pass
#[derive(Debug, Default)]
pub struct MutationTracker {
    mutated: bool,
}

impl MutationTracker {
    /// Create a tracker for a fresh pass
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a sub-step mutated remote state
    pub fn record(&mut self) {
        self.mutated = true;
    }

    /// Whether any sub-step mutated remote state
    pub fn any(&self) -> bool {
        self.mutated
    }
}

/// Local bookkeeping of the last restart nonce this agent acted upon
///
/// The bookkeeping file is deliberately advanced only after a successful
/// restart: a failed restart leaves it behind, so the next pass re-detects
/// the nonce change and re-attempts the restart.
pub struct NonceTracker {
    path: PathBuf,
}

impl NonceTracker {
    /// Track nonces in the given file
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The last nonce this agent restarted for, if any
    pub async fn last(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let nonce = content.trim().to_string();
                (!nonce.is_empty()).then_some(nonce)
            }
            Err(_) => None,
        }
    }

    /// Whether the published nonce differs from the last one acted upon
    pub async fn changed(&self, published: Option<&str>) -> bool {
        match published {
            Some(nonce) => self.last().await.as_deref() != Some(nonce),
            None => false,
        }
    }

    /// Record that this agent has restarted for the given nonce
    pub async fn advance(&self, nonce: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                crate::Error::restart(format!(
                    "failed to create state dir {:?}: {}",
                    parent, e
                ))
            })?;
        }
        tokio::fs::write(&self.path, nonce).await.map_err(|e| {
            crate::Error::restart(format!(
                "failed to record nonce in {:?}: {}",
                self.path, e
            ))
        })
    }
}

/// Generate a fresh restart nonce
pub fn new_nonce() -> String {
    Uuid::new_v4().to_string()
}

/// Finish a reconciliation pass on the leader.
///
/// A no-op when nothing mutated. Otherwise commits the period under the
/// given scope, force-writes local configuration, publishes a fresh nonce,
/// and restarts the gateway exactly once. The nonce is published before the
/// restart on purpose: if the restart fails, follower bookkeeping (and this
/// agent's own) has not advanced, so the next pass retries the restart.
pub async fn complete_pass(
    admin: &dyn AdminOps,
    service: &dyn GatewayService,
    leader: &dyn LeaderStore,
    nonces: &NonceTracker,
    scope: PeriodScope,
    tracker: &MutationTracker,
) -> Result<bool> {
    if !tracker.any() {
        // A previous pass may have published a nonce and then failed to
        // restart; bookkeeping only advances after a successful restart, so
        // the pending restart is re-detected and retried here.
        if let Some(nonce) = leader.get(RESTART_NONCE_KEY).await? {
            if nonces.changed(Some(&nonce)).await {
                info!("pending restart nonce detected, restarting gateway");
                service.restart().await?;
                nonces.advance(&nonce).await?;
                return Ok(false);
            }
        }
        info!("no mutation detected");
        return Ok(false);
    }

    info!("mutation detected, committing period and restarting gateway");
    admin.update_period(&scope, true).await?;
    service.write_configs().await?;

    let nonce = new_nonce();
    leader
        .set(&[(RESTART_NONCE_KEY.to_string(), nonce.clone())])
        .await?;

    service.restart().await?;
    nonces.advance(&nonce).await?;

    debug!(nonce = %nonce, "restart nonce published");
    Ok(true)
}
