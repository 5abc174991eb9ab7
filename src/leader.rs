//! Leader-scoped replicated key/value store
//!
//! Multisite credentials and the restart nonce are shared between the agents
//! of one site through leader storage: the elected leader writes, every agent
//! reads. Leader election itself is an external collaborator; this module
//! only consumes its verdict.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::{Error, Result};

/// Leader store key holding the multisite system user's access key
pub const ACCESS_KEY: &str = "access_key";

/// Leader store key holding the multisite system user's secret key
pub const SECRET_KEY: &str = "secret";

/// Leader store key holding the restart freshness token
pub const RESTART_NONCE_KEY: &str = "restart_nonce";

/// Access to leader election state and the leader key/value store
///
/// The capability split is part of the contract: only the leader may call
/// [`LeaderStore::set`]; followers are read-only consumers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LeaderStore: Send + Sync {
    /// Whether this agent currently holds site leadership
    fn is_leader(&self) -> bool;

    /// Read a value from the replicated leader store
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write key/value pairs to the replicated leader store (leader only)
    async fn set(&self, pairs: &[(String, String)]) -> Result<()>;
}

/// File-backed leader store
///
/// Persists the leader data bag as a JSON object. The deployment tooling is
/// responsible for replicating the file's content between agents; this
/// implementation only enforces the read/write capability split.
pub struct FileLeaderStore {
    path: PathBuf,
    leader: bool,
}

impl FileLeaderStore {
    /// Open a store at the given path with the given leadership verdict
    pub fn open(path: impl Into<PathBuf>, leader: bool) -> Self {
        Self {
            path: path.into(),
            leader,
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::serialization(format!(
                    "corrupt leader store {:?}: {}",
                    self.path, e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::admin(format!(
                "failed to read leader store {:?}: {}",
                self.path, e
            ))),
        }
    }
}

#[async_trait]
impl LeaderStore for FileLeaderStore {
    fn is_leader(&self) -> bool {
        self.leader
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all().await?.get(key).cloned())
    }

    async fn set(&self, pairs: &[(String, String)]) -> Result<()> {
        if !self.leader {
            return Err(Error::admin(
                "leader store is read-only on non-leader agents",
            ));
        }

        let mut all = self.read_all().await?;
        for (key, value) in pairs {
            all.insert(key.clone(), value.clone());
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::admin(format!("failed to create state dir {:?}: {}", parent, e))
            })?;
        }

        let content = serde_json::to_string_pretty(&all)
            .map_err(|e| Error::serialization(e.to_string()))?;
        tokio::fs::write(&self.path, content).await.map_err(|e| {
            Error::admin(format!(
                "failed to write leader store {:?}: {}",
                self.path, e
            ))
        })?;

        debug!(path = ?self.path, keys = pairs.len(), "leader store updated");
        Ok(())
    }
}
