//! Primary-site topology convergence
//!
//! Realm, zonegroup, master zone and the multisite system user are each
//! brought to the configured state with a check-then-create step. Creation is
//! tolerant of concurrent agents: a failed create followed by the entity
//! becoming visible counts as success.

use tracing::{debug, info};

use crate::admin::{UserCreds, ZoneUpdate};
use crate::config::MultisiteNames;
use crate::leader::{ACCESS_KEY, SECRET_KEY};
use crate::restart::MutationTracker;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Result, MULTISITE_SYSTEM_USER};

use super::{migration, stored_creds, Context};

/// Converge realm, zonegroup, zone and system user on a primary site.
///
/// Returns the credentials of the multisite system user, which complete the
/// handshake record published to the secondary site.
pub(super) async fn converge_primary(
    ctx: &Context,
    names: &MultisiteNames,
    endpoints: &[String],
    tracker: &mut MutationTracker,
) -> Result<UserCreds> {
    let admin = ctx.admin.as_ref();

    if !admin.list_realms().await?.contains(&names.realm) {
        info!(realm = %names.realm, "realm not found, creating now");
        admin.create_realm(&names.realm, true).await?;
        tracker.record();
    }

    let zonegroups = admin.list_zonegroups().await?;
    let zones = admin.list_zones().await?;

    // A site that served traffic before multisite was configured carries an
    // implicit topology that owns the existing buckets; it must be renamed
    // in place, never recreated.
    if (!zonegroups.contains(&names.zonegroup) || !zones.contains(&names.zone))
        && admin.cluster_has_buckets().await?
    {
        migration::migrate_existing_site(admin, names, endpoints, tracker).await?;
    }

    ensure_zonegroup(ctx, names, endpoints, tracker).await?;
    ensure_zone(
        ctx,
        &names.zone,
        endpoints,
        true,
        true,
        &names.zonegroup,
        None,
        tracker,
    )
    .await?;

    ensure_system_user(ctx, names, tracker).await
}

async fn ensure_zonegroup(
    ctx: &Context,
    names: &MultisiteNames,
    endpoints: &[String],
    tracker: &mut MutationTracker,
) -> Result<()> {
    let admin = ctx.admin.as_ref();

    if admin.list_zonegroups().await?.contains(&names.zonegroup) {
        debug!(zonegroup = %names.zonegroup, "zonegroup already exists");
        return Ok(());
    }

    info!(zonegroup = %names.zonegroup, "zonegroup not found, creating now");
    match admin
        .create_zonegroup(&names.zonegroup, endpoints, true, true, &names.realm)
        .await
    {
        Ok(()) => {
            tracker.record();
            Ok(())
        }
        Err(e) => {
            // Another agent may have created it concurrently; the entity
            // becoming visible within the retry budget counts as success.
            let appeared = await_visible(
                "zonegroup",
                &names.zonegroup,
                || admin.list_zonegroups(),
            )
            .await;
            if appeared {
                debug!(zonegroup = %names.zonegroup, "zonegroup appeared after create race");
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

/// Poll a list operation until the named entity shows up.
///
/// A freshly created entity can lag the next list call, so absence is
/// treated as a transient failure and retried with the default backoff
/// budget. Returns whether the entity became visible; list failures and
/// exhaustion both report false, leaving the caller to surface its own
/// error.
async fn await_visible<F, Fut>(kind: &str, name: &str, mut list: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<String>>>,
{
    retry_with_backoff(&RetryConfig::default(), kind, || {
        let listed = list();
        async move {
            if listed.await?.iter().any(|entry| entry == name) {
                Ok(())
            } else {
                Err(crate::Error::admin(format!(
                    "{} {} not visible yet",
                    kind, name
                )))
            }
        }
    })
    .await
    .is_ok()
}

/// Ensure a zone exists with the given placement, creating it when absent.
///
/// Used by the primary for its master zone and by the secondary for its
/// replica zone (which passes the pulled system user credentials).
#[allow(clippy::too_many_arguments)]
pub(super) async fn ensure_zone(
    ctx: &Context,
    zone: &str,
    endpoints: &[String],
    default: bool,
    master: bool,
    zonegroup: &str,
    creds: Option<&UserCreds>,
    tracker: &mut MutationTracker,
) -> Result<()> {
    let admin = ctx.admin.as_ref();

    if admin.list_zones().await?.contains(&zone.to_string()) {
        debug!(zone = %zone, "zone already exists");
        return Ok(());
    }

    info!(zone = %zone, zonegroup = %zonegroup, "zone not found, creating now");
    match admin
        .create_zone(zone, endpoints, default, master, zonegroup, creds.cloned())
        .await
    {
        Ok(()) => {
            tracker.record();
            Ok(())
        }
        Err(e) => {
            let appeared = await_visible("zone", zone, || admin.list_zones()).await;
            if appeared {
                debug!(zone = %zone, "zone appeared after create race");
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

async fn ensure_system_user(
    ctx: &Context,
    names: &MultisiteNames,
    tracker: &mut MutationTracker,
) -> Result<UserCreds> {
    let admin = ctx.admin.as_ref();

    let exists = admin
        .list_users()
        .await?
        .iter()
        .any(|user| user == MULTISITE_SYSTEM_USER);

    if !exists {
        info!(user = MULTISITE_SYSTEM_USER, "creating multisite system user");
        let creds = admin.create_user(MULTISITE_SYSTEM_USER, true).await?;

        let update = ZoneUpdate::default()
            .creds(creds.clone())
            .default_zone(true)
            .master(true)
            .zonegroup(names.zonegroup.clone());
        admin.modify_zone(&names.zone, &update).await?;

        persist_creds(ctx, &creds).await?;
        tracker.record();
        return Ok(creds);
    }

    match stored_creds(ctx).await? {
        Some(creds) => Ok(creds),
        None => {
            // Leader storage can lag the remote store (e.g. after a leader
            // change mid-setup); re-fetch from the store and re-persist.
            let creds = admin.user_creds(MULTISITE_SYSTEM_USER).await?;
            persist_creds(ctx, &creds).await?;
            Ok(creds)
        }
    }
}

async fn persist_creds(ctx: &Context, creds: &UserCreds) -> Result<()> {
    ctx.leader
        .set(&[
            (ACCESS_KEY.to_string(), creds.access_key.clone()),
            (SECRET_KEY.to_string(), creds.secret_key.clone()),
        ])
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::admin::MockAdminOps;
    use crate::config::SiteConfig;
    use crate::leader::MockLeaderStore;
    use crate::service::MockGatewayService;

    fn names() -> MultisiteNames {
        MultisiteNames {
            realm: "replicated".to_string(),
            zonegroup: "rgw-east".to_string(),
            zone: "east-1".to_string(),
        }
    }

    fn endpoints() -> Vec<String> {
        vec!["http://east.example.com:80".to_string()]
    }

    fn context(dir: &std::path::Path, admin: MockAdminOps, leader: MockLeaderStore) -> Context {
        let config = SiteConfig {
            realm: Some("replicated".to_string()),
            zonegroup: Some("rgw-east".to_string()),
            zone: Some("east-1".to_string()),
            endpoint: Some("http://east.example.com:80".to_string()),
            state_dir: dir.to_path_buf(),
            ..Default::default()
        };
        Context::builder(config)
            .admin(Arc::new(admin))
            .leader(Arc::new(leader))
            .service(Arc::new(MockGatewayService::new()))
            .build()
    }

    fn writable_leader() -> MockLeaderStore {
        let mut leader = MockLeaderStore::new();
        leader.expect_get().returning(|_| Ok(None));
        leader.expect_set().returning(|_| Ok(()));
        leader
    }

    // ==========================================================================
    // Story: First pass on a fresh primary site
    //
    // An empty store gets realm, zonegroup, zone and system user created, and
    // the generated credentials are returned for the handshake record.
    // ==========================================================================

    #[tokio::test]
    async fn fresh_site_creates_the_full_topology() {
        let mut admin = MockAdminOps::new();
        admin.expect_list_realms().returning(|| Ok(vec![]));
        admin.expect_list_zonegroups().returning(|| Ok(vec![]));
        admin.expect_list_zones().returning(|| Ok(vec![]));
        admin.expect_list_users().returning(|| Ok(vec![]));
        admin.expect_cluster_has_buckets().returning(|| Ok(false));
        admin
            .expect_create_realm()
            .withf(|name, default| name == "replicated" && *default)
            .times(1)
            .returning(|_, _| Ok(()));
        admin
            .expect_create_zonegroup()
            .withf(|name, _, default, master, realm| {
                name == "rgw-east" && *default && *master && realm == "replicated"
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        admin
            .expect_create_zone()
            .withf(|name, _, default, master, zonegroup, creds| {
                name == "east-1" && *default && *master && zonegroup == "rgw-east" && creds.is_none()
            })
            .times(1)
            .returning(|_, _, _, _, _, _| Ok(()));
        admin
            .expect_create_user()
            .withf(|name, system| name == MULTISITE_SYSTEM_USER && *system)
            .times(1)
            .returning(|_, _| Ok(UserCreds::new("AK", "SK")));
        admin
            .expect_modify_zone()
            .withf(|name, update| name == "east-1" && update.creds.is_some())
            .times(1)
            .returning(|_, _| Ok(()));

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), admin, writable_leader());

        let mut tracker = MutationTracker::new();
        let creds = converge_primary(&ctx, &names(), &endpoints(), &mut tracker)
            .await
            .unwrap();
        assert_eq!(creds, UserCreds::new("AK", "SK"));
        assert!(tracker.any());
    }

    // ==========================================================================
    // Story: Second pass is a no-op
    // ==========================================================================

    #[tokio::test]
    async fn converged_site_records_no_mutation() {
        let mut admin = MockAdminOps::new();
        admin
            .expect_list_realms()
            .returning(|| Ok(vec!["replicated".to_string()]));
        admin
            .expect_list_zonegroups()
            .returning(|| Ok(vec!["rgw-east".to_string()]));
        admin
            .expect_list_zones()
            .returning(|| Ok(vec!["east-1".to_string()]));
        admin
            .expect_list_users()
            .returning(|| Ok(vec![MULTISITE_SYSTEM_USER.to_string()]));
        // No create/modify expectations: any write would fail the test

        let mut leader = MockLeaderStore::new();
        leader.expect_get().returning(|key| {
            Ok(Some(match key {
                ACCESS_KEY => "AK".to_string(),
                _ => "SK".to_string(),
            }))
        });

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), admin, leader);

        let mut tracker = MutationTracker::new();
        let creds = converge_primary(&ctx, &names(), &endpoints(), &mut tracker)
            .await
            .unwrap();
        assert_eq!(creds, UserCreds::new("AK", "SK"));
        assert!(!tracker.any());
    }

    // ==========================================================================
    // Story: Create races resolve by re-listing
    // ==========================================================================

    #[tokio::test]
    async fn lost_create_race_counts_as_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let mut admin = MockAdminOps::new();
        // First list misses the zonegroup; after the failed create, the
        // re-list sees it
        admin.expect_list_zonegroups().returning(move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![])
            } else {
                Ok(vec!["rgw-east".to_string()])
            }
        });
        admin
            .expect_create_zonegroup()
            .times(1)
            .returning(|_, _, _, _, _| Err(crate::Error::admin("already exists")));

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), admin, MockLeaderStore::new());

        let mut tracker = MutationTracker::new();
        ensure_zonegroup(&ctx, &names(), &endpoints(), &mut tracker)
            .await
            .unwrap();
        // The entity exists but this agent did not create it
        assert!(!tracker.any());
    }

    #[tokio::test]
    async fn slow_to_appear_entity_is_awaited_within_the_retry_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let mut admin = MockAdminOps::new();
        // Initial check plus three retry attempts miss the zonegroup; the
        // fourth retry sees it, well inside the default attempt budget
        admin.expect_list_zonegroups().returning(move || {
            if c.fetch_add(1, Ordering::SeqCst) < 4 {
                Ok(vec![])
            } else {
                Ok(vec!["rgw-east".to_string()])
            }
        });
        admin
            .expect_create_zonegroup()
            .times(1)
            .returning(|_, _, _, _, _| Err(crate::Error::admin("already exists")));

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), admin, MockLeaderStore::new());

        let mut tracker = MutationTracker::new();
        ensure_zonegroup(&ctx, &names(), &endpoints(), &mut tracker)
            .await
            .unwrap();
        assert!(!tracker.any());
        assert!(calls.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn genuinely_failed_create_propagates() {
        let mut admin = MockAdminOps::new();
        admin.expect_list_zones().returning(|| Ok(vec![]));
        admin
            .expect_create_zone()
            .times(1)
            .returning(|_, _, _, _, _, _| Err(crate::Error::admin("store unreachable")));

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), admin, MockLeaderStore::new());

        let mut tracker = MutationTracker::new();
        let result = ensure_zone(
            &ctx,
            "east-1",
            &endpoints(),
            true,
            true,
            "rgw-east",
            None,
            &mut tracker,
        )
        .await;
        assert!(result.is_err());
        assert!(!tracker.any());
    }

    // ==========================================================================
    // Story: Credential recovery after a leader change
    // ==========================================================================

    #[tokio::test]
    async fn existing_user_with_lost_creds_is_refetched_and_persisted() {
        let mut admin = MockAdminOps::new();
        admin
            .expect_list_users()
            .returning(|| Ok(vec![MULTISITE_SYSTEM_USER.to_string()]));
        admin
            .expect_user_creds()
            .times(1)
            .returning(|_| Ok(UserCreds::new("AK2", "SK2")));

        let mut leader = MockLeaderStore::new();
        leader.expect_get().returning(|_| Ok(None));
        leader
            .expect_set()
            .withf(|pairs| pairs.iter().any(|(k, v)| k == ACCESS_KEY && v == "AK2"))
            .times(1)
            .returning(|_| Ok(()));

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), admin, leader);

        let mut tracker = MutationTracker::new();
        let creds = ensure_system_user(&ctx, &names(), &mut tracker).await.unwrap();
        assert_eq!(creds, UserCreds::new("AK2", "SK2"));
        // Re-reading credentials is not a topology mutation
        assert!(!tracker.any());
    }
}
