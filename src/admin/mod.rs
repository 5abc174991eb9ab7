//! Administrative interface client for the remote topology store
//!
//! The remote store is mutated through the gateway's admin tooling. It has no
//! transactions and no dry-run: every call either succeeds, fails, or
//! partially applies. The [`AdminOps`] trait is the narrow seam the
//! reconciler works through, so every operation can be mocked in tests and
//! backed by `radosgw-admin` in production.

mod cli;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use cli::RadosgwAdmin;

/// Access/secret key pair for a gateway user
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreds {
    /// S3-style access key
    pub access_key: String,
    /// S3-style secret key
    pub secret_key: String,
}

impl UserCreds {
    /// Create a credential pair
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

/// Direction of object replication declared by a sync flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncFlowType {
    /// Objects replicate in both directions between the two zones
    Symmetrical,
    /// Objects replicate from source zone(s) to destination zone(s) only
    Directional,
}

impl fmt::Display for SyncFlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFlowType::Symmetrical => write!(f, "symmetrical"),
            SyncFlowType::Directional => write!(f, "directional"),
        }
    }
}

impl FromStr for SyncFlowType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symmetrical" => Ok(SyncFlowType::Symmetrical),
            "directional" => Ok(SyncFlowType::Directional),
            other => Err(Error::config(format!(
                "unknown sync flow type '{}', expected symmetrical or directional",
                other
            ))),
        }
    }
}

/// Status of a sync policy group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicyState {
    /// Sync is enabled for the zones in the group
    Enabled,
    /// Sync is allowed but must be enabled at bucket level
    Allowed,
    /// Sync is forbidden for the zones in the group
    Forbidden,
}

impl fmt::Display for SyncPolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPolicyState::Enabled => write!(f, "enabled"),
            SyncPolicyState::Allowed => write!(f, "allowed"),
            SyncPolicyState::Forbidden => write!(f, "forbidden"),
        }
    }
}

impl FromStr for SyncPolicyState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" => Ok(SyncPolicyState::Enabled),
            "allowed" => Ok(SyncPolicyState::Allowed),
            "forbidden" => Ok(SyncPolicyState::Forbidden),
            other => Err(Error::config(format!(
                "unknown sync policy state '{}', expected enabled, allowed or forbidden",
                other
            ))),
        }
    }
}

/// Field changes applied by a zone modify operation
///
/// Only set fields are sent to the remote store; unset fields are left
/// untouched.
#[derive(Clone, Debug, Default)]
pub struct ZoneUpdate {
    /// New endpoint list for the zone
    pub endpoints: Option<Vec<String>>,
    /// Credentials to bind to the zone
    pub creds: Option<UserCreds>,
    /// Mark the zone as the default zone
    pub default: Option<bool>,
    /// Mark the zone as the master zone of its zonegroup
    pub master: Option<bool>,
    /// Zonegroup the modify is scoped to
    pub zonegroup: Option<String>,
    /// Realm the zone should be linked to
    pub realm: Option<String>,
}

impl ZoneUpdate {
    /// Set the endpoint list
    pub fn endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Bind credentials to the zone
    pub fn creds(mut self, creds: UserCreds) -> Self {
        self.creds = Some(creds);
        self
    }

    /// Set the default flag
    pub fn default_zone(mut self, default: bool) -> Self {
        self.default = Some(default);
        self
    }

    /// Set the master flag
    pub fn master(mut self, master: bool) -> Self {
        self.master = Some(master);
        self
    }

    /// Scope the modify to a zonegroup
    pub fn zonegroup(mut self, zonegroup: impl Into<String>) -> Self {
        self.zonegroup = Some(zonegroup.into());
        self
    }

    /// Link the zone to a realm
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }
}

/// Scope of a period update (commit of the versioned remote configuration)
#[derive(Clone, Debug, Default)]
pub struct PeriodScope {
    /// Realm to commit under
    pub realm: Option<String>,
    /// Zonegroup to commit under
    pub zonegroup: Option<String>,
    /// Zone to commit under
    pub zone: Option<String>,
}

impl PeriodScope {
    /// Scope the commit to a realm
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Scope the commit to a zonegroup
    pub fn zonegroup(mut self, zonegroup: impl Into<String>) -> Self {
        self.zonegroup = Some(zonegroup.into());
        self
    }

    /// Scope the commit to a zone
    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }
}

/// Summary of a zonegroup as reported by the remote store
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ZoneGroupInfo {
    /// Zonegroup name
    pub name: String,
    /// Names of the member zones
    pub zones: Vec<String>,
}

/// A sync flow as currently configured in the remote store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncFlowState {
    /// Flow identifier
    pub id: String,
    /// Flow direction
    pub flow_type: SyncFlowType,
    /// Source zone of the flow
    pub source_zone: String,
    /// Destination zone of the flow
    pub dest_zone: String,
}

/// A sync pipe as currently configured in the remote store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncPipeState {
    /// Pipe identifier
    pub id: String,
    /// Zones objects replicate from
    pub source_zones: Vec<String>,
    /// Zones objects replicate to
    pub dest_zones: Vec<String>,
}

/// A sync policy group as currently configured in the remote store
#[derive(Clone, Debug, Default)]
pub struct SyncGroupState {
    /// Group identifier
    pub id: String,
    /// Group status string as reported by the store
    pub status: String,
    /// Flows configured in the group
    pub flows: Vec<SyncFlowState>,
    /// Pipes configured in the group
    pub pipes: Vec<SyncPipeState>,
}

/// Administrative operations against the remote topology store
///
/// All calls are synchronous from the reconciler's point of view and may
/// fail with [`Error::Admin`]. None of them are transactional; the
/// reconciler's diff-then-write loop is the only consistency mechanism.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AdminOps: Send + Sync {
    /// List realm names known to the remote store
    async fn list_realms(&self) -> Result<Vec<String>>;

    /// List zonegroup names known to the remote store
    async fn list_zonegroups(&self) -> Result<Vec<String>>;

    /// List zone names known to the remote store
    async fn list_zones(&self) -> Result<Vec<String>>;

    /// List gateway user ids
    async fn list_users(&self) -> Result<Vec<String>>;

    /// Create a realm, optionally as the default realm
    async fn create_realm(&self, name: &str, default: bool) -> Result<()>;

    /// Create a zonegroup under a realm
    async fn create_zonegroup(
        &self,
        name: &str,
        endpoints: &[String],
        default: bool,
        master: bool,
        realm: &str,
    ) -> Result<()>;

    /// Create a zone under a zonegroup, optionally binding credentials
    async fn create_zone(
        &self,
        name: &str,
        endpoints: &[String],
        default: bool,
        master: bool,
        zonegroup: &str,
        creds: Option<UserCreds>,
    ) -> Result<()>;

    /// Modify fields of an existing zone
    async fn modify_zone(&self, name: &str, update: &ZoneUpdate) -> Result<()>;

    /// Update a zonegroup's endpoints and realm linkage
    async fn modify_zonegroup(&self, name: &str, endpoints: &[String], realm: &str) -> Result<()>;

    /// Rename a zonegroup, preserving its member zones and data
    async fn rename_zonegroup(&self, old: &str, new: &str) -> Result<()>;

    /// Rename a zone, preserving its objects
    async fn rename_zone(&self, old: &str, new: &str) -> Result<()>;

    /// Fetch the member zones of a zonegroup
    async fn zonegroup_info(&self, name: &str) -> Result<ZoneGroupInfo>;

    /// Remove a zone from a zonegroup
    async fn remove_zone_from_zonegroup(&self, zone: &str, zonegroup: &str) -> Result<()>;

    /// Create a gateway user and return its generated credentials
    async fn create_user(&self, name: &str, system: bool) -> Result<UserCreds>;

    /// Fetch the credentials of an existing user
    async fn user_creds(&self, name: &str) -> Result<UserCreds>;

    /// Suspend a user without deleting it
    async fn suspend_user(&self, name: &str) -> Result<()>;

    /// Fetch a sync policy group, or None if it does not exist
    async fn sync_group(&self, group_id: &str) -> Result<Option<SyncGroupState>>;

    /// Create or update a sync policy group with the given status
    async fn create_sync_group(&self, group_id: &str, status: SyncPolicyState) -> Result<()>;

    /// Create or update a sync flow inside a group
    async fn create_sync_group_flow(
        &self,
        group_id: &str,
        flow_id: &str,
        flow_type: SyncFlowType,
        source_zone: &str,
        dest_zone: &str,
    ) -> Result<()>;

    /// Create or update a sync pipe inside a group
    async fn create_sync_group_pipe(
        &self,
        group_id: &str,
        pipe_id: &str,
        source_zones: &[String],
        dest_zones: &[String],
    ) -> Result<()>;

    /// Pull the realm configuration from a primary site
    async fn pull_realm(&self, url: &str, creds: &UserCreds) -> Result<()>;

    /// Pull the current period from a primary site
    async fn pull_period(&self, url: &str, creds: &UserCreds) -> Result<()>;

    /// Mark a realm as the default realm for this site
    async fn set_default_realm(&self, name: &str) -> Result<()>;

    /// Commit the versioned remote configuration
    ///
    /// With `fatal = false` a failure is logged and swallowed; this is used
    /// to force materialization of the store's root configuration before the
    /// gateway daemon first starts.
    async fn update_period(&self, scope: &PeriodScope, fatal: bool) -> Result<()>;

    /// Whether any bucket exists anywhere on this cluster
    async fn cluster_has_buckets(&self) -> Result<bool>;
}
