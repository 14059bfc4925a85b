//! Conduit operator - rolls out conduit proxies, one sync group member at a time

mod runner;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::{Client, CustomResourceExt};
use tracing::{error, info, warn};

use conduit_common::crd::{Conduit, Trench};
use conduit_common::leader_election::{LeaderElector, LEADER_LEASE_NAME};
use conduit_common::telemetry::{init_telemetry, LogOutput, TelemetryConfig};
use conduit_common::{DEFAULT_OPERATOR_NAMESPACE, DEFAULT_SYNC_GROUP_ANNOTATION};
use conduit_controller::{ConduitContext, ControllerConfig};
use conduit_workload::{
    ProxyConfig, ResourceTemplates, DEFAULT_PROXY_IMAGE, DEFAULT_RESOURCE_TEMPLATE_PATH,
    PROXY_CONTAINERS,
};

/// Conduit operator - reconciles Conduits into proxy DaemonSets
#[derive(Parser, Debug)]
#[command(name = "conduit-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Conduit and Trench CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the conduit controller (default mode)
    Controller,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Plain,
}

impl From<LogFormat> for LogOutput {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => LogOutput::Json,
            LogFormat::Plain => LogOutput::Plain,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// Delay before retrying a conduit whose sync group is busy
    #[arg(long, env = "CONDUIT_UPDATE_RETRY_DELAY_MS", default_value_t = 2000)]
    update_retry_delay_ms: u64,

    /// Periodic requeue of settled conduits
    #[arg(long, env = "CONDUIT_RESYNC_INTERVAL_SECS", default_value_t = 300)]
    resync_interval_secs: u64,

    /// Annotation declaring a conduit's update sync group
    #[arg(
        long,
        env = "CONDUIT_UPDATE_SYNC_GROUP_ANNOTATION",
        default_value = DEFAULT_SYNC_GROUP_ANNOTATION
    )]
    update_sync_group_annotation: String,

    /// Prefix of every generated resource name
    #[arg(long, env = "RESOURCE_NAME_PREFIX", default_value = "")]
    resource_name_prefix: String,

    /// Proxy container image
    #[arg(long, env = "CONDUIT_PROXY_IMAGE", default_value = DEFAULT_PROXY_IMAGE)]
    proxy_image: String,

    /// Image pull secrets for the proxy pods, comma separated
    #[arg(long, env = "IMAGE_PULL_SECRET", value_delimiter = ',')]
    image_pull_secrets: Vec<String>,

    /// Directory of per-container resource template files
    #[arg(long, env = "RESOURCE_TEMPLATE_PATH", default_value = DEFAULT_RESOURCE_TEMPLATE_PATH)]
    resource_template_path: String,

    /// Log level handed to the proxies
    #[arg(long, env = "LOG_LEVEL", default_value = "DEBUG")]
    log_level: String,

    /// Only watch conduits in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Run controllers only while holding the leader lease
    #[arg(long, env = "LEADER_ELECTION")]
    leader_election: bool,

    /// Namespace of the leader lease
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    lease_namespace: String,

    /// Holder identity for the leader lease (defaults to the hostname)
    #[arg(long, env = "POD_NAME")]
    identity: Option<String>,

    /// Operator log output format
    #[arg(long, env = "CONDUIT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

impl ControllerArgs {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            update_retry_delay: Duration::from_millis(self.update_retry_delay_ms),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            sync_group_annotation: self.update_sync_group_annotation.clone(),
            proxy: ProxyConfig {
                resource_name_prefix: self.resource_name_prefix.clone(),
                image: self.proxy_image.clone(),
                log_level: self.log_level.clone(),
                image_pull_secrets: self.image_pull_secrets.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn lease_identity(&self) -> String {
        self.identity.clone().unwrap_or_else(|| {
            std::env::var("HOSTNAME")
                .unwrap_or_else(|_| format!("conduit-operator-{}", std::process::id()))
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [Conduit::crd(), Trench::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        output: cli.controller.log_format.into(),
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

/// Run the conduit controller, behind the leader lease if enabled
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let mut config = args.controller_config();
    config.resource_templates =
        ResourceTemplates::load(Path::new(&args.resource_template_path), PROXY_CONTAINERS)
            .map_err(|e| anyhow::anyhow!("Failed to load resource templates: {}", e))?;
    info!(
        retry_delay_ms = args.update_retry_delay_ms,
        annotation = %config.sync_group_annotation,
        namespace = args.watch_namespace.as_deref().unwrap_or("<all>"),
        "starting conduit operator"
    );

    let guard = if args.leader_election {
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_LEASE_NAME,
            &args.lease_namespace,
            &args.lease_identity(),
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    // Sync group state starts empty and is rebuilt as conduits reconcile
    let ctx = Arc::new(ConduitContext::new(client.clone(), config));
    let controllers = runner::run(client, ctx, args.watch_namespace.as_deref());

    let Some(mut guard) = guard else {
        controllers.await;
        return Ok(());
    };

    let lost = tokio::select! {
        () = controllers => false,
        () = guard.lost() => true,
    };
    if lost {
        error!("leadership lost, exiting");
        return Err(anyhow::anyhow!("leadership lost"));
    }
    if let Err(e) = guard.release_leadership().await {
        warn!(error = %e, "failed to release leader lease");
    }
    Ok(())
}
