//! Gateway user provisioning for consuming applications
//!
//! Applications request an S3-style user over a relation, optionally with
//! the system role. The store cannot switch a user between system and
//! non-system in place, so the two classes get distinct names derived from
//! the request id; when the requested class changes, the old user is
//! suspended rather than deleted so its keys stop working without losing
//! audit history.

use std::collections::BTreeMap;

use tracing::{info, instrument};

use crate::relation::{ACCESS_KEY, SECRET, UID};
use crate::Result;

use super::{Context, PassOutcome};

/// Name of the gateway user serving a given request id
pub fn gateway_username(request_id: &str) -> String {
    format!("rgw-user-{}", request_id.replace(':', "-"))
}

/// Name of the system-role gateway user serving a given request id
pub fn gateway_system_username(request_id: &str) -> String {
    format!("{}-system", gateway_username(request_id))
}

/// Provision a gateway user for a consuming application.
///
/// Ensures a user of the requested class exists, suspends a leftover user of
/// the opposite class, and publishes the user id and credentials for the
/// requesting application.
#[instrument(skip(ctx))]
pub async fn user_requested(
    ctx: &Context,
    request_id: &str,
    system_role: bool,
) -> Result<PassOutcome> {
    if !ctx.leader.is_leader() {
        info!("not the site leader, skipping gateway user provisioning");
        return Ok(PassOutcome::deferred("not the site leader"));
    }
    if ctx.service.is_paused() {
        return Ok(PassOutcome::deferred("unit is paused"));
    }

    let (wanted, superseded) = if system_role {
        (
            gateway_system_username(request_id),
            gateway_username(request_id),
        )
    } else {
        (
            gateway_username(request_id),
            gateway_system_username(request_id),
        )
    };

    let users = ctx.admin.list_users().await?;

    // An earlier request may have provisioned the opposite class
    if users.iter().any(|u| *u == superseded) {
        info!(user = %superseded, "suspending superseded gateway user");
        ctx.admin.suspend_user(&superseded).await?;
    }

    let (creds, created) = if users.iter().any(|u| *u == wanted) {
        (ctx.admin.user_creds(&wanted).await?, false)
    } else {
        info!(user = %wanted, system = system_role, "creating gateway user");
        (ctx.admin.create_user(&wanted, system_role).await?, true)
    };

    let mut publish = BTreeMap::new();
    publish.insert(UID.to_string(), wanted);
    publish.insert(ACCESS_KEY.to_string(), creds.access_key);
    publish.insert(SECRET.to_string(), creds.secret_key);

    Ok(PassOutcome::converged(created).with_publish(publish))
}

/// Retire the gateway users of a departed application.
///
/// Both user classes are suspended; the request id may have cycled through
/// either over its lifetime.
#[instrument(skip(ctx))]
pub async fn user_departed(ctx: &Context, request_id: &str) -> Result<PassOutcome> {
    if !ctx.leader.is_leader() {
        info!("not the site leader, skipping gateway user retirement");
        return Ok(PassOutcome::deferred("not the site leader"));
    }
    if ctx.service.is_paused() {
        return Ok(PassOutcome::deferred("unit is paused"));
    }

    let users = ctx.admin.list_users().await?;
    let mut suspended = false;

    for user in [
        gateway_system_username(request_id),
        gateway_username(request_id),
    ] {
        if users.iter().any(|u| *u == user) {
            info!(user = %user, "suspending gateway user of departed application");
            ctx.admin.suspend_user(&user).await?;
            suspended = true;
        }
    }

    Ok(PassOutcome::converged(suspended))
}
