//! `orbit-mirror`: backup, restore and purge an OrbitDB-shaped log database
//! against a Storacha/w3up-shaped remote store, over an IPFS-gateway-shaped
//! download path. A thin `clap` wrapper around `orbit_mirror::orchestrator`.

mod filelogdb;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use orbit_mirror::{
    config::Config,
    model::ExtractionMode,
    orchestrator::{BackupSource, Orchestrator},
    remote::{AuthProvider, Credentials},
};
use orbit_mirror_reqwest::{HttpGatewayFetcher, HttpRemoteStore};
use tracing::info;

use filelogdb::FileLogDb;

/// Turns `Credentials` into the headers the remote store's HTTP API expects.
/// Credential plumbing itself (signing, delegation verification) is out of
/// scope; this just carries the configured values through as headers.
struct CliAuthProvider;

#[async_trait]
impl AuthProvider for CliAuthProvider {
    async fn auth_headers(&self, credentials: &Credentials) -> anyhow::Result<Vec<(String, String)>> {
        Ok(match credentials {
            Credentials::KeyAndProof { remote_key, remote_proof } => vec![
                ("x-auth-key".to_string(), remote_key.clone()),
                ("x-auth-proof".to_string(), remote_proof.clone()),
            ],
            Credentials::DelegatedCapability { delegated_capability_token, recipient_key_archive } => vec![
                ("authorization".to_string(), format!("Bearer {delegated_capability_token}")),
                ("x-recipient-key-archive".to_string(), recipient_key_archive.clone()),
            ],
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "orbit-mirror", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base URL of the remote store's API (upload/store/blob layers).
    #[arg(long, env = "ORBIT_MIRROR_REMOTE_URL", global = true)]
    remote_url: String,

    /// Container (space/bucket) id to operate on.
    #[arg(long, env = "ORBIT_MIRROR_CONTAINER", global = true)]
    container: String,

    /// Directory this binary keeps its own log-DB block files in.
    #[arg(long, env = "ORBIT_MIRROR_DATA_DIR", global = true, default_value = "./orbit-mirror-data")]
    data_dir: PathBuf,

    /// Per-attempt network timeout, in milliseconds.
    #[arg(long, env = "ORBIT_MIRROR_TIMEOUT_MS", global = true, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Ordered, comma-separated list of IPFS gateway base URLs for downloads.
    #[arg(long, env = "ORBIT_MIRROR_GATEWAYS", global = true, value_delimiter = ',')]
    gateways: Vec<String>,

    /// Inner-batch concurrency for uploads and purges.
    #[arg(long, env = "ORBIT_MIRROR_BATCH_SIZE", global = true, default_value_t = 10)]
    batch_size: usize,

    /// Outer parallel batch count for uploads.
    #[arg(long, env = "ORBIT_MIRROR_MAX_CONCURRENCY", global = true, default_value_t = 3)]
    max_concurrency: usize,

    /// Remote signing key identifier (key+proof auth mode).
    #[arg(long, env = "ORBIT_MIRROR_REMOTE_KEY", global = true)]
    remote_key: Option<String>,

    /// Proof of delegated capability for `--remote-key`.
    #[arg(long, env = "ORBIT_MIRROR_REMOTE_PROOF", global = true)]
    remote_proof: Option<String>,

    /// Delegated-capability bearer token (alternative to key+proof).
    #[arg(long, env = "ORBIT_MIRROR_DELEGATED_TOKEN", global = true)]
    delegated_capability_token: Option<String>,

    /// Recipient key archive for `--delegated-capability-token`.
    #[arg(long, env = "ORBIT_MIRROR_RECIPIENT_KEY_ARCHIVE", global = true)]
    recipient_key_archive: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract and upload a database's blocks.
    Backup {
        /// Canonical address of the database to back up (`/orbitdb/<root-cid>`).
        address: String,
        /// Upload only log-entry blocks, skipping root/access-controller/identity.
        #[arg(long)]
        log_entries_only: bool,
    },
    /// Recover a database from the remote store, reconstructing if needed.
    Restore {
        /// Skip root selection and always reconstruct from log entries.
        #[arg(long)]
        force_fallback: bool,
        /// Name to give the recreated database if reconstruction is used.
        #[arg(long)]
        fallback_database_name: Option<String>,
    },
    /// Remove every object this container holds across all three remote layers.
    Purge,
}

fn credentials(cli: &Cli) -> anyhow::Result<Option<Credentials>> {
    if let (Some(remote_key), Some(remote_proof)) = (&cli.remote_key, &cli.remote_proof) {
        return Ok(Some(Credentials::KeyAndProof {
            remote_key: remote_key.clone(),
            remote_proof: remote_proof.clone(),
        }));
    }
    if let (Some(token), Some(archive)) = (&cli.delegated_capability_token, &cli.recipient_key_archive) {
        return Ok(Some(Credentials::DelegatedCapability {
            delegated_capability_token: token.clone(),
            recipient_key_archive: archive.clone(),
        }));
    }
    if cli.remote_key.is_some() || cli.remote_proof.is_some() {
        anyhow::bail!("--remote-key requires --remote-proof (and vice versa)");
    }
    if cli.delegated_capability_token.is_some() || cli.recipient_key_archive.is_some() {
        anyhow::bail!("--delegated-capability-token requires --recipient-key-archive (and vice versa)");
    }
    Ok(None)
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config {
        timeout: Duration::from_millis(cli.timeout_ms),
        batch_size: cli.batch_size,
        max_concurrency: cli.max_concurrency,
        credentials: credentials(cli)?,
        container_id: Some(cli.container.clone()),
        ..Config::default()
    };
    if !cli.gateways.is_empty() {
        config.gateways = cli.gateways.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let credentials = config.credentials.clone().context(
        "no credentials supplied: pass --remote-key/--remote-proof or \
         --delegated-capability-token/--recipient-key-archive",
    )?;

    let http = reqwest::Client::builder().timeout(config.timeout).build()?;
    let remote = HttpRemoteStore::new(
        http.clone(),
        cli.remote_url.clone(),
        Arc::new(CliAuthProvider),
        credentials,
        orbit_mirror::remote::ContainerId(cli.container.clone()),
    );
    let fetcher = HttpGatewayFetcher::new(http);
    let logdb = FileLogDb::open(&cli.data_dir, "03cli-identity").await?;

    match cli.command {
        Command::Backup { address, log_entries_only } => {
            let orchestrator = Orchestrator::new(remote, logdb, fetcher, config);
            let mode = if log_entries_only { ExtractionMode::LogEntriesOnly } else { ExtractionMode::Full };
            let summary = orchestrator.backup(BackupSource::Address(address), mode).await?;
            info!(
                root_cid = %summary.root_cid,
                uploaded = summary.uploaded,
                total = summary.total,
                "backup complete"
            );
            println!(
                "backed up {} ({} of {} blocks uploaded)",
                summary.source_address, summary.uploaded, summary.total
            );
        }
        Command::Restore { force_fallback, fallback_database_name } => {
            let mut config = config;
            config.force_fallback = force_fallback;
            config.fallback_database_name = fallback_database_name;
            let orchestrator = Orchestrator::new(remote, logdb, fetcher, config);
            let summary = orchestrator.restore().await?;
            println!(
                "restored {} via {:?} ({} entries recovered, address match: {})",
                summary.address, summary.method, summary.entries_recovered, summary.address_match
            );
        }
        Command::Purge => {
            let orchestrator = Orchestrator::new(remote, logdb, fetcher, config);
            let summary = orchestrator.purge().await?;
            println!(
                "purged {} found / {} removed / {} failed (fully drained: {})",
                summary.total_found,
                summary.total_removed,
                summary.total_failed,
                summary.fully_drained()
            );
            if !summary.fully_drained() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
