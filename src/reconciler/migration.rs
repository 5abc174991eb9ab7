//! Migration of a pre-existing single site into a named multisite topology
//!
//! A gateway that served traffic before multisite was configured carries an
//! implicit zonegroup and zone (typically both named "default") that already
//! own the site's buckets. Recreating them under the configured names would
//! strand that data, so the existing objects are renamed in place and then
//! re-linked to the configured realm and endpoints.

use tracing::info;

use crate::admin::{AdminOps, ZoneUpdate};
use crate::config::MultisiteNames;
use crate::restart::MutationTracker;
use crate::{Error, Result};

/// What a migration pass found and did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The configured names already exist; nothing to migrate
    AlreadyConverged,
    /// Existing objects were renamed and re-linked
    Migrated,
}

/// Pick the object an existing site's topology should be renamed from.
///
/// Returns `None` when the desired name already exists (or nothing exists at
/// all), the single existing name when the choice is unambiguous, and an
/// error when several candidates exist and none matches. The error path must
/// be hit before any write: guessing wrong here would rename an object that
/// owns live data.
fn rename_candidate(existing: &[String], desired: &str, kind: &str) -> Result<Option<String>> {
    if existing.iter().any(|name| name == desired) || existing.is_empty() {
        return Ok(None);
    }
    match existing {
        [single] => Ok(Some(single.clone())),
        _ => Err(Error::ambiguous(format!(
            "multiple {}s exist ({}) and none match the configured name '{}'; \
             rename the surplus {}s manually before relating the sites",
            kind,
            existing.join(", "),
            desired,
            kind
        ))),
    }
}

/// Rename an existing site's implicit topology to the configured names.
///
/// Both rename decisions are made before either rename is issued, so an
/// ambiguous zone never leaves behind a half-renamed zonegroup.
pub(super) async fn migrate_existing_site(
    admin: &dyn AdminOps,
    names: &MultisiteNames,
    endpoints: &[String],
    tracker: &mut MutationTracker,
) -> Result<MigrationOutcome> {
    let zonegroups = admin.list_zonegroups().await?;
    let zones = admin.list_zones().await?;

    let zonegroup_from = rename_candidate(&zonegroups, &names.zonegroup, "zonegroup")?;
    let zone_from = rename_candidate(&zones, &names.zone, "zone")?;

    if zonegroup_from.is_none() && zone_from.is_none() {
        return Ok(MigrationOutcome::AlreadyConverged);
    }

    if let Some(old) = &zonegroup_from {
        info!(from = %old, to = %names.zonegroup, "renaming existing zonegroup");
        admin.rename_zonegroup(old, &names.zonegroup).await?;
        tracker.record();
    }

    if let Some(old) = &zone_from {
        info!(from = %old, to = %names.zone, "renaming existing zone");
        admin.rename_zone(old, &names.zone).await?;
        tracker.record();
    }

    // The renamed objects still point at their pre-multisite configuration;
    // link them to the configured realm and advertise our endpoints.
    admin
        .modify_zonegroup(&names.zonegroup, endpoints, &names.realm)
        .await?;

    let update = ZoneUpdate::default()
        .endpoints(endpoints.to_vec())
        .default_zone(true)
        .master(true)
        .zonegroup(names.zonegroup.clone())
        .realm(names.realm.clone());
    admin.modify_zone(&names.zone, &update).await?;
    tracker.record();

    Ok(MigrationOutcome::Migrated)
}
