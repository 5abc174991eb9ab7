//! Zonegroup sync policy convergence
//!
//! The sync policy is a three-level structure in the remote store: a group
//! holding the overall status, flows declaring replication direction between
//! zone pairs, and pipes selecting which buckets participate. This module
//! computes the desired group/flow/pipe from configuration plus the
//! secondary's published record, diffs it against the store, and writes only
//! what differs.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::admin::{
    SyncFlowState, SyncFlowType, SyncGroupState, SyncPipeState, SyncPolicyState,
};
use crate::relation::SecondaryRecord;
use crate::restart::MutationTracker;
use crate::{Result, DEFAULT_SYNC_GROUP_ID};

use super::Context;

/// Which parts of a sync policy group differ from the desired state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncGroupDiff {
    /// The group itself is missing or its status differs
    pub group: bool,
    /// The flow is missing or differs
    pub flow: bool,
    /// The pipe is missing or differs
    pub pipe: bool,
}

impl SyncGroupDiff {
    /// Whether anything needs to be written
    pub fn any(&self) -> bool {
        self.group || self.flow || self.pipe
    }
}

/// Diff the existing sync group against the desired configuration.
///
/// Zone lists in pipes are compared as sets; the store does not guarantee
/// ordering. A `None` existing group means everything must be created.
pub fn sync_group_update_needed(
    existing: Option<&SyncGroupState>,
    desired_status: SyncPolicyState,
    desired_flow: &SyncFlowState,
    desired_pipe: &SyncPipeState,
) -> SyncGroupDiff {
    let Some(group) = existing else {
        return SyncGroupDiff {
            group: true,
            flow: true,
            pipe: true,
        };
    };

    let group_differs = !group
        .status
        .eq_ignore_ascii_case(&desired_status.to_string());

    let flow_differs = !group.flows.iter().any(|flow| {
        flow.id == desired_flow.id
            && flow.flow_type == desired_flow.flow_type
            && flow.source_zone == desired_flow.source_zone
            && flow.dest_zone == desired_flow.dest_zone
    });

    let desired_sources: BTreeSet<&String> = desired_pipe.source_zones.iter().collect();
    let desired_dests: BTreeSet<&String> = desired_pipe.dest_zones.iter().collect();
    let pipe_differs = !group.pipes.iter().any(|pipe| {
        pipe.id == desired_pipe.id
            && pipe.source_zones.iter().collect::<BTreeSet<_>>() == desired_sources
            && pipe.dest_zones.iter().collect::<BTreeSet<_>>() == desired_dests
    });

    SyncGroupDiff {
        group: group_differs,
        flow: flow_differs,
        pipe: pipe_differs,
    }
}

/// Resolve the effective flow type for a secondary zone.
///
/// Cloud-tier zones cannot serve as a replication source, so a symmetrical
/// request is downgraded to directional with a warning rather than rejected.
fn effective_flow_type(secondary: &SecondaryRecord) -> SyncFlowType {
    let cloud_tier = secondary
        .zone_tier_type
        .as_deref()
        .map(|tier| tier.eq_ignore_ascii_case("cloud"))
        .unwrap_or(false);

    if cloud_tier && secondary.flow_type == SyncFlowType::Symmetrical {
        warn!(
            zone = %secondary.zone,
            "cloud-tier zones cannot sync symmetrically, forcing directional flow"
        );
        SyncFlowType::Directional
    } else {
        secondary.flow_type
    }
}

/// Converge the default sync policy group for one primary/secondary pair.
pub(super) async fn converge(
    ctx: &Context,
    primary_zone: &str,
    secondary: &SecondaryRecord,
    desired_status: SyncPolicyState,
    tracker: &mut MutationTracker,
) -> Result<()> {
    let flow_type = effective_flow_type(secondary);

    // Flow and pipe ids are derived from the zone pair, so re-running the
    // pass updates the same objects instead of accumulating new ones.
    let pair_id = format!("{}-{}", primary_zone, secondary.zone);

    let desired_flow = SyncFlowState {
        id: pair_id.clone(),
        flow_type,
        source_zone: primary_zone.to_string(),
        dest_zone: secondary.zone.clone(),
    };

    let desired_pipe = match flow_type {
        SyncFlowType::Directional => SyncPipeState {
            id: pair_id.clone(),
            source_zones: vec![primary_zone.to_string()],
            dest_zones: vec![secondary.zone.clone()],
        },
        SyncFlowType::Symmetrical => SyncPipeState {
            id: pair_id.clone(),
            source_zones: vec![primary_zone.to_string(), secondary.zone.clone()],
            dest_zones: vec![primary_zone.to_string(), secondary.zone.clone()],
        },
    };

    let existing = ctx.admin.sync_group(DEFAULT_SYNC_GROUP_ID).await?;
    let diff = sync_group_update_needed(
        existing.as_ref(),
        desired_status,
        &desired_flow,
        &desired_pipe,
    );

    if !diff.any() {
        debug!(group = DEFAULT_SYNC_GROUP_ID, "sync policy already converged");
        return Ok(());
    }

    if diff.group {
        info!(
            group = DEFAULT_SYNC_GROUP_ID,
            status = %desired_status,
            "configuring sync policy group"
        );
        ctx.admin
            .create_sync_group(DEFAULT_SYNC_GROUP_ID, desired_status)
            .await?;
        tracker.record();
    }

    if diff.flow {
        info!(
            flow = %desired_flow.id,
            flow_type = %flow_type,
            "configuring sync policy flow"
        );
        ctx.admin
            .create_sync_group_flow(
                DEFAULT_SYNC_GROUP_ID,
                &desired_flow.id,
                flow_type,
                primary_zone,
                &secondary.zone,
            )
            .await?;
        tracker.record();
    }

    if diff.pipe {
        info!(pipe = %desired_pipe.id, "configuring sync policy pipe");
        ctx.admin
            .create_sync_group_pipe(
                DEFAULT_SYNC_GROUP_ID,
                &desired_pipe.id,
                &desired_pipe.source_zones,
                &desired_pipe.dest_zones,
            )
            .await?;
        tracker.record();
    }

    Ok(())
}
