//! Site configuration for the multisite agent
//!
//! The configuration declares the desired topology names for this site plus
//! the sync policy intent. It deliberately carries no notion of the remote
//! state: every reconciliation pass re-derives that from the store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::admin::{SyncFlowType, SyncPolicyState};
use crate::{Error, Result};

/// The three topology names a multisite deployment needs
///
/// Produced by [`SiteConfig::multisite_names`]; constructing one proves the
/// configuration is complete enough to reconcile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisiteNames {
    /// Realm name for this topology
    pub realm: String,
    /// Zonegroup name for this site
    pub zonegroup: String,
    /// Zone name for this site
    pub zone: String,
}

/// Declarative configuration for one site
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// Realm name (required before multisite can be configured)
    #[serde(default)]
    pub realm: Option<String>,

    /// Zonegroup name (required before multisite can be configured)
    #[serde(default)]
    pub zonegroup: Option<String>,

    /// Zone name (required before multisite can be configured)
    #[serde(default)]
    pub zone: Option<String>,

    /// Public URL of this gateway, advertised to the peer site and used as
    /// the endpoint of created zones/zonegroups
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Name of the gateway service unit managed by this agent
    #[serde(default = "default_service")]
    pub service: String,

    /// Desired status of the zonegroup sync policy group; unset skips sync
    /// policy reconciliation entirely
    #[serde(default)]
    pub sync_policy_state: Option<SyncPolicyState>,

    /// Requested sync flow direction, advertised by a secondary site
    #[serde(default = "default_flow_type")]
    pub sync_policy_flow_type: SyncFlowType,

    /// Storage tier of this site's zone ("cloud" forces directional sync)
    #[serde(default)]
    pub zone_tier_type: Option<String>,

    /// Directory holding the agent's local bookkeeping (leader kv cache,
    /// last applied restart nonce)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_service() -> String {
    "radosgw".to_string()
}

fn default_flow_type() -> SyncFlowType {
    SyncFlowType::Symmetrical
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/radosgw-multisite")
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            realm: None,
            zonegroup: None,
            zone: None,
            endpoint: None,
            service: default_service(),
            sync_policy_state: None,
            sync_policy_flow_type: default_flow_type(),
            zone_tier_type: None,
            state_dir: default_state_dir(),
        }
    }
}

impl SiteConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("failed to read config file {:?}: {}", path, e))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse config file {:?}: {}", path, e)))
    }

    /// Resolve the required topology names, or fail with a configuration
    /// error naming what is missing.
    pub fn multisite_names(&self) -> Result<MultisiteNames> {
        match (&self.realm, &self.zonegroup, &self.zone) {
            (Some(realm), Some(zonegroup), Some(zone))
                if !realm.is_empty() && !zonegroup.is_empty() && !zone.is_empty() =>
            {
                Ok(MultisiteNames {
                    realm: realm.clone(),
                    zonegroup: zonegroup.clone(),
                    zone: zone.clone(),
                })
            }
            _ => Err(Error::config(
                "realm, zonegroup and zone config options must all be set",
            )),
        }
    }

    /// Endpoint list for created zones/zonegroups
    pub fn endpoints(&self) -> Result<Vec<String>> {
        match &self.endpoint {
            Some(url) if !url.is_empty() => Ok(vec![url.clone()]),
            _ => Err(Error::config("endpoint config option must be set")),
        }
    }

    /// Path of the follower-side restart nonce bookkeeping file
    pub fn nonce_path(&self) -> PathBuf {
        self.state_dir.join("restart_nonce")
    }

    /// Path of the leader key/value cache file
    pub fn leader_store_path(&self) -> PathBuf {
        self.state_dir.join("leader.json")
    }
}
