//! Multisite reconciliation agent for the RADOS gateway.
//!
//! The binary is invoked once per triggering event by the deployment
//! tooling's hook dispatcher. It loads the site configuration, runs the
//! matching reconciliation pass, prints the key/value pairs to publish on
//! the inter-site relation as JSON on stdout, and exits.
//!
//! Exit codes: 0 for a converged or deferred pass, 2 when the pass is
//! blocked on operator action (bad configuration, ambiguous topology,
//! non-pristine secondary), 1 for any other failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use radosgw_multisite::config::SiteConfig;
use radosgw_multisite::leader::FileLeaderStore;
use radosgw_multisite::reconciler::{self, Context};

#[derive(Parser)]
#[command(
    name = "radosgw-multisite",
    version,
    about = "Reconciliation agent for RADOS gateway multisite replication"
)]
struct Cli {
    /// Path to the site configuration file
    #[arg(
        long,
        env = "RADOSGW_MULTISITE_CONFIG",
        default_value = "/etc/radosgw-multisite.yaml"
    )]
    config: PathBuf,

    /// Whether this agent currently holds site leadership
    #[arg(long, env = "RADOSGW_MULTISITE_LEADER")]
    leader: bool,

    #[command(subcommand)]
    event: Event,
}

#[derive(Subcommand)]
enum Event {
    /// A secondary site joined the relation: converge primary topology
    PrimaryJoined,

    /// The secondary's relation data changed: converge the sync policy
    PrimaryChanged {
        /// JSON file holding the relation data published by the secondary
        #[arg(long)]
        relation_data: Option<PathBuf>,
    },

    /// The primary's relation data changed: pull the realm, create the zone
    SecondaryChanged {
        /// JSON file holding the relation data published by the primary
        #[arg(long)]
        relation_data: Option<PathBuf>,
    },

    /// The inter-site relation departed: scale multisite back down
    RelationDeparted,

    /// Leader-shared settings changed: restart if the nonce advanced
    LeaderSettingsChanged,

    /// An application requested a gateway user
    UserChanged {
        /// Identifier of the requesting relation
        #[arg(long)]
        request_id: String,
        /// Provision a system-role user
        #[arg(long)]
        system_role: bool,
    },

    /// An application holding gateway users departed
    UserDeparted {
        /// Identifier of the departed relation
        #[arg(long)]
        request_id: String,
    },

    /// Deprecated alias for primary-joined
    #[command(hide = true)]
    MasterJoined,

    /// Deprecated alias for secondary-changed
    #[command(hide = true)]
    SlaveChanged {
        /// JSON file holding the relation data published by the primary
        #[arg(long)]
        relation_data: Option<PathBuf>,
    },
}

async fn read_relation_data(path: Option<&Path>) -> anyhow::Result<BTreeMap<String, String>> {
    let Some(path) = path else {
        // No data file means the peer has published nothing yet; the pass
        // defers on the empty record.
        return Ok(BTreeMap::new());
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read relation data from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse relation data in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = SiteConfig::load(&cli.config).await?;
    let leader_path = config.leader_store_path();
    let ctx = Context::builder(config)
        .leader(Arc::new(FileLeaderStore::open(leader_path, cli.leader)))
        .build();

    let result = match &cli.event {
        Event::PrimaryJoined => reconciler::primary_joined(&ctx).await,
        Event::PrimaryChanged { relation_data } => {
            let inbound = read_relation_data(relation_data.as_deref()).await?;
            reconciler::primary_changed(&ctx, &inbound).await
        }
        Event::SecondaryChanged { relation_data } => {
            let inbound = read_relation_data(relation_data.as_deref()).await?;
            reconciler::secondary_changed(&ctx, &inbound).await
        }
        Event::RelationDeparted => reconciler::relation_departed(&ctx).await,
        Event::LeaderSettingsChanged => reconciler::leader_settings_changed(&ctx).await,
        Event::UserChanged {
            request_id,
            system_role,
        } => reconciler::user_requested(&ctx, request_id, *system_role).await,
        Event::UserDeparted { request_id } => {
            reconciler::user_departed(&ctx, request_id).await
        }
        Event::MasterJoined => reconciler::master_joined(&ctx).await,
        Event::SlaveChanged { relation_data } => {
            let inbound = read_relation_data(relation_data.as_deref()).await?;
            reconciler::slave_changed(&ctx, &inbound).await
        }
    };

    match result {
        Ok(outcome) => {
            info!(status = %outcome.status, "pass finished");
            if !outcome.publish.is_empty() {
                println!("{}", serde_json::to_string_pretty(&outcome.publish)?);
            }
            Ok(())
        }
        Err(e) if e.is_blocking() => {
            error!(error = %e, "pass blocked, operator action required");
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}
