//! Reconciliation entry points
//!
//! Each entry point corresponds to one triggering event (relation joined,
//! relation data changed, relation departed, leader settings changed) and
//! runs one complete pass to completion: observe remote state, apply the
//! minimal mutations, coordinate the restart. State is always re-derived
//! from the remote store and the inbound relation data, never trusted from
//! a prior run.

mod migration;
mod sync_policy;
mod topology;
mod users;

pub use migration::MigrationOutcome;
pub use sync_policy::{sync_group_update_needed, SyncGroupDiff};
pub use users::{gateway_system_username, gateway_username, user_departed, user_requested};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::admin::{AdminOps, PeriodScope, RadosgwAdmin, UserCreds, ZoneUpdate};
use crate::config::SiteConfig;
use crate::leader::{FileLeaderStore, LeaderStore, ACCESS_KEY, RESTART_NONCE_KEY, SECRET_KEY};
use crate::relation::{primary_advert, secondary_advert, PrimaryRecord, SecondaryRecord};
use crate::restart::{complete_pass, MutationTracker, NonceTracker};
use crate::service::{GatewayService, SystemdGateway};
use crate::{Error, Result};

/// Terminal status of one reconciliation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassStatus {
    /// The pass ran to completion; `mutated` reports whether remote state
    /// changed
    Converged {
        /// Whether this pass mutated remote state
        mutated: bool,
    },
    /// The pass no-opped while waiting for data or leadership; retried on
    /// the next triggering event
    Deferred(String),
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassStatus::Converged { mutated: true } => write!(f, "converged (mutated)"),
            PassStatus::Converged { mutated: false } => write!(f, "converged (no change)"),
            PassStatus::Deferred(reason) => write!(f, "deferred: {}", reason),
        }
    }
}

/// Result of one reconciliation pass
#[derive(Clone, Debug)]
pub struct PassOutcome {
    /// Terminal status of the pass
    pub status: PassStatus,
    /// Relation key/value pairs to publish to the peer site
    pub publish: BTreeMap<String, String>,
}

impl PassOutcome {
    fn converged(mutated: bool) -> Self {
        Self {
            status: PassStatus::Converged { mutated },
            publish: BTreeMap::new(),
        }
    }

    fn deferred(reason: impl Into<String>) -> Self {
        Self {
            status: PassStatus::Deferred(reason.into()),
            publish: BTreeMap::new(),
        }
    }

    fn with_publish(mut self, publish: BTreeMap<String, String>) -> Self {
        self.publish = publish;
        self
    }

    /// Whether this pass mutated remote state
    pub fn mutated(&self) -> bool {
        matches!(self.status, PassStatus::Converged { mutated: true })
    }

    /// Whether this pass deferred
    pub fn is_deferred(&self) -> bool {
        matches!(self.status, PassStatus::Deferred(_))
    }
}

/// Shared state for all reconciliation entry points
///
/// Holds the external collaborators behind trait objects so tests can swap
/// in mocks. Use [`Context::builder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(config)
///     .leader(Arc::new(FileLeaderStore::open(path, is_leader)))
///     .build();
/// ```
pub struct Context {
    /// Administrative interface client
    pub admin: Arc<dyn AdminOps>,
    /// Leader election state and leader key/value store
    pub leader: Arc<dyn LeaderStore>,
    /// Gateway service lifecycle
    pub service: Arc<dyn GatewayService>,
    /// Local restart nonce bookkeeping
    pub nonces: NonceTracker,
    /// Site configuration
    pub config: SiteConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(config: SiteConfig) -> ContextBuilder {
        ContextBuilder::new(config)
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    config: SiteConfig,
    admin: Option<Arc<dyn AdminOps>>,
    leader: Option<Arc<dyn LeaderStore>>,
    service: Option<Arc<dyn GatewayService>>,
}

impl ContextBuilder {
    fn new(config: SiteConfig) -> Self {
        Self {
            config,
            admin: None,
            leader: None,
            service: None,
        }
    }

    /// Override the admin client (primarily for testing)
    pub fn admin(mut self, admin: Arc<dyn AdminOps>) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Set the leader store
    pub fn leader(mut self, leader: Arc<dyn LeaderStore>) -> Self {
        self.leader = Some(leader);
        self
    }

    /// Override the gateway service handle (primarily for testing)
    pub fn service(mut self, service: Arc<dyn GatewayService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Build the Context, falling back to the production implementations
    pub fn build(self) -> Context {
        let nonces = NonceTracker::open(self.config.nonce_path());
        let leader_path = self.config.leader_store_path();
        let service_unit = self.config.service.clone();

        Context {
            admin: self.admin.unwrap_or_else(|| Arc::new(RadosgwAdmin::new())),
            // Defaulting to non-leader is safe: it can only defer, never
            // mutate.
            leader: self
                .leader
                .unwrap_or_else(|| Arc::new(FileLeaderStore::open(leader_path, false))),
            service: self
                .service
                .unwrap_or_else(|| Arc::new(SystemdGateway::new(service_unit))),
            nonces,
            config: self.config,
        }
    }
}

async fn stored_creds(ctx: &Context) -> Result<Option<UserCreds>> {
    let access = ctx.leader.get(ACCESS_KEY).await?;
    let secret = ctx.leader.get(SECRET_KEY).await?;
    Ok(match (access, secret) {
        (Some(access), Some(secret)) => Some(UserCreds::new(access, secret)),
        _ => None,
    })
}

/// Force materialization of the remote store's root configuration.
///
/// The admin tool has no direct operation for this; a non-fatal period
/// update creates the required data items before the gateway daemon first
/// starts. Only needed until the first restart nonce has been published.
async fn prime_remote_store(ctx: &Context) -> Result<()> {
    if ctx.leader.get(RESTART_NONCE_KEY).await?.is_none() {
        info!("no restart nonce found, forcing initial period update");
        ctx.admin
            .update_period(&PeriodScope::default(), false)
            .await?;
    }
    Ok(())
}

/// Reconcile a primary site's topology.
///
/// Ensures realm, zonegroup, master zone and the multisite system user all
/// exist with the configured names, migrating a pre-existing site's implicit
/// topology when needed, and publishes the handshake record for the
/// secondary site.
#[instrument(skip(ctx))]
pub async fn primary_joined(ctx: &Context) -> Result<PassOutcome> {
    if ctx.service.is_paused() {
        return Ok(PassOutcome::deferred("unit is paused"));
    }

    let names = ctx.config.multisite_names()?;
    let endpoints = ctx.config.endpoints()?;
    let url = endpoints[0].clone();

    // Publish what we know on every pass, even as a follower; mutation alone
    // is leader-gated.
    let known = stored_creds(ctx).await?;
    let publish = primary_advert(&names.realm, &names.zonegroup, &url, known.as_ref());

    if !ctx.leader.is_leader() {
        info!("not the site leader, skipping multisite configuration");
        return Ok(PassOutcome::deferred("not the site leader").with_publish(publish));
    }

    prime_remote_store(ctx).await?;

    let mut tracker = MutationTracker::new();
    let creds = topology::converge_primary(ctx, &names, &endpoints, &mut tracker).await?;

    let scope = PeriodScope::default()
        .zonegroup(names.zonegroup.clone())
        .zone(names.zone.clone());
    let mutated = complete_pass(
        ctx.admin.as_ref(),
        ctx.service.as_ref(),
        ctx.leader.as_ref(),
        &ctx.nonces,
        scope,
        &tracker,
    )
    .await?;

    let publish = primary_advert(&names.realm, &names.zonegroup, &url, Some(&creds));
    Ok(PassOutcome::converged(mutated).with_publish(publish))
}

/// Reconcile the sync policy between this primary and a secondary site.
///
/// Runs once the secondary has published its zone and requested flow type.
/// Only the diff between desired and current group/flow/pipe configuration
/// is written.
#[instrument(skip(ctx, inbound))]
pub async fn primary_changed(
    ctx: &Context,
    inbound: &BTreeMap<String, String>,
) -> Result<PassOutcome> {
    if ctx.service.is_paused() {
        return Ok(PassOutcome::deferred("unit is paused"));
    }
    if !ctx.leader.is_leader() {
        info!("not the site leader, skipping sync policy configuration");
        return Ok(PassOutcome::deferred("not the site leader"));
    }

    let Some(desired_status) = ctx.config.sync_policy_state else {
        info!("sync_policy_state not set, skipping sync policy configuration");
        return Ok(PassOutcome::deferred("sync_policy_state not set"));
    };

    let names = ctx.config.multisite_names()?;

    let Some(secondary) = SecondaryRecord::from_map(inbound)? else {
        info!("deferring until the secondary site has provided required data");
        return Ok(PassOutcome::deferred("waiting for secondary site data"));
    };

    let mut tracker = MutationTracker::new();
    sync_policy::converge(ctx, &names.zone, &secondary, desired_status, &mut tracker).await?;

    let scope = PeriodScope::default()
        .zonegroup(names.zonegroup.clone())
        .zone(names.zone.clone());
    let mutated = complete_pass(
        ctx.admin.as_ref(),
        ctx.service.as_ref(),
        ctx.leader.as_ref(),
        &ctx.nonces,
        scope,
        &tracker,
    )
    .await?;

    Ok(PassOutcome::converged(mutated))
}

/// Reconcile a secondary site against a primary's published record.
///
/// Defers until the inbound record is complete, verifies realm/zonegroup
/// agreement, enforces the pristine-site precondition, then pulls the realm
/// and creates the local zone.
#[instrument(skip(ctx, inbound))]
pub async fn secondary_changed(
    ctx: &Context,
    inbound: &BTreeMap<String, String>,
) -> Result<PassOutcome> {
    if !ctx.leader.is_leader() {
        info!("not the site leader, skipping multisite configuration");
        return Ok(PassOutcome::deferred("not the site leader"));
    }
    if ctx.service.is_paused() {
        return Ok(PassOutcome::deferred("unit is paused"));
    }

    let names = ctx.config.multisite_names()?;
    let endpoints = ctx.config.endpoints()?;

    let Some(primary) = PrimaryRecord::from_map(inbound) else {
        info!("deferring until the primary site has provided required data");
        return Ok(PassOutcome::deferred("waiting for primary site data"));
    };

    if (&names.realm, &names.zonegroup) != (&primary.realm, &primary.zonegroup) {
        return Err(Error::config(format!(
            "realm/zonegroup mismatch with primary site: local ({}, {}), remote ({}, {})",
            names.realm, names.zonegroup, primary.realm, primary.zonegroup
        )));
    }

    prime_remote_store(ctx).await?;

    // A site with existing data would create inconsistencies when added as a
    // secondary; it must be pristine.
    if ctx.admin.cluster_has_buckets().await? {
        return Err(Error::pristine(
            "site already holds buckets and cannot be used as a secondary",
        ));
    }

    let mut tracker = MutationTracker::new();

    if !ctx.admin.list_realms().await?.contains(&names.realm) {
        info!(realm = %names.realm, "realm not found, pulling from primary");
        ctx.admin.pull_realm(&primary.url, &primary.creds).await?;
        ctx.admin.pull_period(&primary.url, &primary.creds).await?;
        ctx.admin.set_default_realm(&names.realm).await?;
        tracker.record();
    }

    if !ctx.admin.list_zones().await?.contains(&names.zone) {
        info!(zone = %names.zone, "zone not found, creating now");
        ctx.admin.pull_period(&primary.url, &primary.creds).await?;
        topology::ensure_zone(
            ctx,
            &names.zone,
            &endpoints,
            false,
            false,
            &names.zonegroup,
            Some(&primary.creds),
            &mut tracker,
        )
        .await?;
    }

    let scope = PeriodScope::default()
        .zonegroup(names.zonegroup.clone())
        .zone(names.zone.clone());
    let mutated = complete_pass(
        ctx.admin.as_ref(),
        ctx.service.as_ref(),
        ctx.leader.as_ref(),
        &ctx.nonces,
        scope,
        &tracker,
    )
    .await?;

    let publish = secondary_advert(
        Some(&names.zone),
        ctx.config.sync_policy_flow_type,
        ctx.config.zone_tier_type.as_deref(),
    );
    Ok(PassOutcome::converged(mutated).with_publish(publish))
}

/// Scale multisite back down when the inter-site relation departs.
///
/// The leader removes every foreign zone from the zonegroup, promotes its
/// own zone back to default master, and commits the period. Residual
/// multisite configuration afterwards is surfaced as an error.
#[instrument(skip(ctx))]
pub async fn relation_departed(ctx: &Context) -> Result<PassOutcome> {
    if !ctx.leader.is_leader() {
        info!("not the site leader, skipping multisite scaledown");
        return Ok(PassOutcome::deferred("not the site leader"));
    }
    if ctx.service.is_paused() {
        return Ok(PassOutcome::deferred("unit is paused"));
    }

    let names = ctx.config.multisite_names()?;

    // Relation removal can arrive before multisite was ever configured.
    let zones = ctx.admin.list_zones().await?;
    let zonegroups = ctx.admin.list_zonegroups().await?;
    if !zones.contains(&names.zone) || !zonegroups.contains(&names.zonegroup) {
        info!("multisite is not configured, skipping scaledown");
        return Ok(PassOutcome::deferred("multisite is not configured"));
    }

    let info = ctx.admin.zonegroup_info(&names.zonegroup).await?;
    for zone in info.zones.iter().filter(|z| **z != names.zone) {
        info!(zone = %zone, zonegroup = %names.zonegroup, "removing zone from zonegroup");
        ctx.admin
            .remove_zone_from_zonegroup(zone, &names.zonegroup)
            .await?;
    }

    let update = ZoneUpdate::default()
        .default_zone(true)
        .master(true)
        .zonegroup(names.zonegroup.clone());
    ctx.admin.modify_zone(&names.zone, &update).await?;

    let scope = PeriodScope::default()
        .realm(names.realm.clone())
        .zonegroup(names.zonegroup.clone())
        .zone(names.zone.clone());
    ctx.admin.update_period(&scope, true).await?;

    let remaining = ctx.admin.zonegroup_info(&names.zonegroup).await?;
    if remaining.zones.iter().any(|z| *z != names.zone) {
        return Err(Error::admin(
            "residual multisite configuration after scaledown",
        ));
    }

    Ok(PassOutcome::converged(true))
}

/// React to a change of the leader-shared settings on a follower.
///
/// The leader only ever publishes a new restart nonce after a mutating
/// pass; observing a changed nonce means the local gateway must restart
/// once. Repeated observations of the same nonce are no-ops. A paused unit
/// defers without advancing its bookkeeping, so the pending nonce is acted
/// on once the unit resumes.
#[instrument(skip(ctx))]
pub async fn leader_settings_changed(ctx: &Context) -> Result<PassOutcome> {
    if ctx.service.is_paused() {
        return Ok(PassOutcome::deferred("unit is paused"));
    }

    let published = ctx.leader.get(RESTART_NONCE_KEY).await?;

    if let Some(nonce) = published {
        if ctx.nonces.changed(Some(&nonce)).await {
            info!("restart nonce changed, restarting gateway");
            ctx.service.restart().await?;
            ctx.nonces.advance(&nonce).await?;
            return Ok(PassOutcome::converged(false));
        }
    }

    Ok(PassOutcome::deferred("restart nonce unchanged"))
}

/// Deprecated alias for [`primary_joined`] kept for the old relation name
pub async fn master_joined(ctx: &Context) -> Result<PassOutcome> {
    warn!("the master relation is deprecated, use the primary relation instead");
    primary_joined(ctx).await
}

/// Deprecated alias for [`secondary_changed`] kept for the old relation name
pub async fn slave_changed(
    ctx: &Context,
    inbound: &BTreeMap<String, String>,
) -> Result<PassOutcome> {
    warn!("the slave relation is deprecated, use the secondary relation instead");
    secondary_changed(ctx, inbound).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::MockAdminOps;
    use crate::leader::MockLeaderStore;
    use crate::service::MockGatewayService;

    fn site_config(dir: &std::path::Path) -> SiteConfig {
        SiteConfig {
            realm: Some("replicated".to_string()),
            zonegroup: Some("rgw-east".to_string()),
            zone: Some("east-1".to_string()),
            endpoint: Some("http://east.example.com:80".to_string()),
            state_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn running_service() -> MockGatewayService {
        let mut service = MockGatewayService::new();
        service.expect_is_paused().return_const(false);
        service
    }

    fn follower() -> MockLeaderStore {
        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(false);
        leader.expect_get().returning(|_| Ok(None));
        leader
    }

    fn context(
        dir: &std::path::Path,
        admin: MockAdminOps,
        leader: MockLeaderStore,
        service: MockGatewayService,
    ) -> Context {
        Context::builder(site_config(dir))
            .admin(Arc::new(admin))
            .leader(Arc::new(leader))
            .service(Arc::new(service))
            .build()
    }

    // ==========================================================================
    // Story: Leader Exclusivity
    //
    // Non-leader agents must never issue a mutating admin operation. The
    // MockAdminOps below has no expectations set, so any admin call at all
    // would fail the test.
    // ==========================================================================

    #[tokio::test]
    async fn non_leader_primary_pass_is_a_pure_noop() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), MockAdminOps::new(), follower(), running_service());

        let outcome = primary_joined(&ctx).await.unwrap();
        assert!(outcome.is_deferred());
        // The handshake record still goes out so the peer's view stays fresh
        assert_eq!(
            outcome.publish.get("realm").map(String::as_str),
            Some("replicated")
        );
        assert!(!outcome.publish.contains_key("access_key"));
    }

    #[tokio::test]
    async fn non_leader_secondary_pass_is_a_pure_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(false);
        let ctx = context(
            dir.path(),
            MockAdminOps::new(),
            leader,
            MockGatewayService::new(),
        );

        let outcome = secondary_changed(&ctx, &BTreeMap::new()).await.unwrap();
        assert!(outcome.is_deferred());
    }

    #[tokio::test]
    async fn non_leader_sync_policy_pass_is_a_pure_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(false);
        let ctx = context(
            dir.path(),
            MockAdminOps::new(),
            leader,
            running_service(),
        );

        let outcome = primary_changed(&ctx, &BTreeMap::new()).await.unwrap();
        assert!(outcome.is_deferred());
    }

    #[tokio::test]
    async fn non_leader_departed_pass_is_a_pure_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(false);
        let ctx = context(
            dir.path(),
            MockAdminOps::new(),
            leader,
            MockGatewayService::new(),
        );

        let outcome = relation_departed(&ctx).await.unwrap();
        assert!(outcome.is_deferred());
    }

    // ==========================================================================
    // Story: Paused units defer all reconciliation
    // ==========================================================================

    #[tokio::test]
    async fn paused_unit_defers_before_touching_anything() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = MockGatewayService::new();
        service.expect_is_paused().return_const(true);

        let ctx = context(
            dir.path(),
            MockAdminOps::new(),
            MockLeaderStore::new(),
            service,
        );

        let outcome = primary_joined(&ctx).await.unwrap();
        assert_eq!(
            outcome.status,
            PassStatus::Deferred("unit is paused".to_string())
        );
    }

    #[tokio::test]
    async fn paused_leader_defers_scaledown() {
        let dir = tempfile::tempdir().unwrap();
        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(true);
        let mut service = MockGatewayService::new();
        service.expect_is_paused().return_const(true);

        // No admin expectations: a paused unit must not touch the store
        let ctx = context(dir.path(), MockAdminOps::new(), leader, service);

        let outcome = relation_departed(&ctx).await.unwrap();
        assert_eq!(
            outcome.status,
            PassStatus::Deferred("unit is paused".to_string())
        );
    }

    #[tokio::test]
    async fn paused_follower_leaves_the_pending_nonce_for_later() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = MockGatewayService::new();
        service.expect_is_paused().return_const(true);

        // No restart expectation: a paused unit must not act on the nonce
        let ctx = context(
            dir.path(),
            MockAdminOps::new(),
            MockLeaderStore::new(),
            service,
        );

        let outcome = leader_settings_changed(&ctx).await.unwrap();
        assert!(outcome.is_deferred());

        // The bookkeeping did not advance, so the nonce stays pending
        assert!(ctx.nonces.changed(Some("n1")).await);
    }

    // ==========================================================================
    // Story: Missing configuration blocks the pass
    // ==========================================================================

    #[tokio::test]
    async fn missing_names_surface_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = site_config(dir.path());
        config.zone = None;

        let ctx = Context::builder(config)
            .admin(Arc::new(MockAdminOps::new()))
            .leader(Arc::new(MockLeaderStore::new()))
            .service(Arc::new(running_service()))
            .build();

        assert!(matches!(
            primary_joined(&ctx).await,
            Err(Error::Config(_))
        ));
    }

    // ==========================================================================
    // Story: Secondary aborts on mismatched topology names
    // ==========================================================================

    #[tokio::test]
    async fn secondary_rejects_mismatched_realm() {
        let dir = tempfile::tempdir().unwrap();
        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(true);

        let ctx = context(dir.path(), MockAdminOps::new(), leader, running_service());

        let inbound = primary_advert(
            "other-realm",
            "rgw-east",
            "http://east.example.com:80",
            Some(&UserCreds::new("AK", "SK")),
        );
        assert!(matches!(
            secondary_changed(&ctx, &inbound).await,
            Err(Error::Config(_))
        ));
    }

    // ==========================================================================
    // Story: Pristine-site enforcement
    //
    // A secondary with existing buckets never calls pull/create operations.
    // The mock only allows the read-side calls that precede the check.
    // ==========================================================================

    #[tokio::test]
    async fn secondary_with_buckets_is_rejected_before_any_mutation() {
        let dir = tempfile::tempdir().unwrap();

        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(true);
        leader.expect_get().returning(|_| Ok(Some("n1".to_string())));

        let mut admin = MockAdminOps::new();
        admin.expect_cluster_has_buckets().returning(|| Ok(true));

        let ctx = context(dir.path(), admin, leader, running_service());

        let inbound = primary_advert(
            "replicated",
            "rgw-east",
            "http://east.example.com:80",
            Some(&UserCreds::new("AK", "SK")),
        );
        assert!(matches!(
            secondary_changed(&ctx, &inbound).await,
            Err(Error::Pristine(_))
        ));
    }

    // ==========================================================================
    // Story: Sync policy pass defers until configured and informed
    // ==========================================================================

    #[tokio::test]
    async fn sync_policy_pass_defers_without_policy_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(true);

        let ctx = context(dir.path(), MockAdminOps::new(), leader, running_service());

        let outcome = primary_changed(&ctx, &BTreeMap::new()).await.unwrap();
        assert_eq!(
            outcome.status,
            PassStatus::Deferred("sync_policy_state not set".to_string())
        );
    }

    #[tokio::test]
    async fn sync_policy_pass_defers_until_secondary_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = site_config(dir.path());
        config.sync_policy_state = Some(crate::admin::SyncPolicyState::Enabled);

        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(true);

        let ctx = Context::builder(config)
            .admin(Arc::new(MockAdminOps::new()))
            .leader(Arc::new(leader))
            .service(Arc::new(running_service()))
            .build();

        let outcome = primary_changed(&ctx, &BTreeMap::new()).await.unwrap();
        assert!(outcome.is_deferred());
    }

    // ==========================================================================
    // Story: Follower restart coordination
    // ==========================================================================

    #[tokio::test]
    async fn follower_restarts_once_per_nonce_change() {
        let dir = tempfile::tempdir().unwrap();

        let make_leader = || {
            let mut leader = MockLeaderStore::new();
            leader
                .expect_get()
                .returning(|_| Ok(Some("nonce-1".to_string())));
            leader
        };

        let mut service = MockGatewayService::new();
        service.expect_is_paused().return_const(false);
        service.expect_restart().times(1).returning(|| Ok(()));

        let ctx = context(dir.path(), MockAdminOps::new(), make_leader(), service);

        // First observation restarts
        let outcome = leader_settings_changed(&ctx).await.unwrap();
        assert!(!outcome.is_deferred());

        // Second observation of the same nonce does not (the mock would
        // panic on a second restart call)
        let outcome = leader_settings_changed(&ctx).await.unwrap();
        assert!(outcome.is_deferred());
    }

    #[tokio::test]
    async fn failed_restart_is_retried_on_the_next_observation() {
        let dir = tempfile::tempdir().unwrap();

        let mut leader = MockLeaderStore::new();
        leader
            .expect_get()
            .returning(|_| Ok(Some("nonce-1".to_string())));

        let mut service = MockGatewayService::new();
        service.expect_is_paused().return_const(false);
        let mut attempts = 0;
        service.expect_restart().times(2).returning(move || {
            attempts += 1;
            if attempts == 1 {
                Err(Error::restart("unit failed to start"))
            } else {
                Ok(())
            }
        });

        let ctx = context(dir.path(), MockAdminOps::new(), leader, service);

        // First observation fails to restart; bookkeeping does not advance
        assert!(leader_settings_changed(&ctx).await.is_err());

        // Same nonce still counts as changed, so the restart is retried
        let outcome = leader_settings_changed(&ctx).await.unwrap();
        assert!(!outcome.is_deferred());
    }

    // ==========================================================================
    // Story: Deprecated relation names delegate to the canonical passes
    // ==========================================================================

    #[tokio::test]
    async fn master_relation_delegates_to_primary() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), MockAdminOps::new(), follower(), running_service());

        let outcome = master_joined(&ctx).await.unwrap();
        assert!(outcome.is_deferred());
        assert_eq!(
            outcome.publish.get("zonegroup").map(String::as_str),
            Some("rgw-east")
        );
    }

    #[tokio::test]
    async fn slave_relation_delegates_to_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let mut leader = MockLeaderStore::new();
        leader.expect_is_leader().return_const(false);
        let ctx = context(
            dir.path(),
            MockAdminOps::new(),
            leader,
            MockGatewayService::new(),
        );

        let outcome = slave_changed(&ctx, &BTreeMap::new()).await.unwrap();
        assert!(outcome.is_deferred());
    }
}
