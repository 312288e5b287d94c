use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rollwatch_core::{Rollout, RolloutRef};
use rollwatch_fixtures::{predicates, Common, FixtureConfig, When};
use rollwatch_ops::{KubeRolloutOps, RolloutOps};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rollwatchctl", version, about = "Drive and watch Argo Rollouts")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace of the rollout (default: ROLLWATCH_NAMESPACE or "default")
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply a multi-document YAML file containing one Rollout and its dependencies
    Apply {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Set the image of every container in the pod template
    SetImage { name: String, image: String },
    /// Resume a paused rollout
    Promote {
        name: String,
        /// Skip all remaining steps and analysis
        #[arg(long = "full", action = ArgAction::SetTrue)]
        full: bool,
    },
    Abort { name: String },
    Retry { name: String },
    Restart { name: String },
    Delete { name: String },
    /// Block until the computed status equals STATUS (Healthy, Progressing, Paused, Degraded, InvalidSpec)
    WaitStatus {
        name: String,
        status: String,
        /// Seconds (default: ROLLWATCH_WAIT_TIMEOUT_SECS or 90)
        #[arg(long = "timeout")]
        timeout: Option<u64>,
    },
    /// Block until status.currentStepIndex equals INDEX
    WaitStep {
        name: String,
        index: i32,
        #[arg(long = "timeout")]
        timeout: Option<u64>,
    },
    /// Print computed status and step of a rollout
    Status { name: String },
}

fn init_tracing() {
    let env = std::env::var("ROLLWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ROLLWATCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid ROLLWATCH_METRICS_ADDR; expected host:port");
        }
    }
}

fn attach(common: Common, name: String) -> Result<When> {
    Ok(common.given().attach(name)?.when())
}

#[derive(serde::Serialize)]
struct StatusRow<'a> {
    namespace: &'a str,
    name: &'a str,
    status: String,
    step: Option<i32>,
    steps: Option<usize>,
    aborted: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = FixtureConfig::from_env();
    if let Some(ns) = cli.namespace.clone() {
        config = config.with_namespace(ns);
    }
    let ops: Arc<dyn RolloutOps> = Arc::new(KubeRolloutOps::try_default().await?);
    let common = Common::new(ops.clone(), config.clone());
    let timeout_or_default = |t: Option<u64>| t.map(Duration::from_secs).unwrap_or(config.default_timeout);

    match cli.command {
        Commands::Apply { file } => {
            info!(file = %file.display(), ns = %config.namespace, "apply invoked");
            let yaml = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            common.given().rollout_objects(&yaml)?.when().apply_manifests().await?;
        }
        Commands::SetImage { name, image } => {
            attach(common, name)?.update_image(&image).await?;
        }
        Commands::Promote { name, full } => {
            let when = attach(common, name)?;
            if full {
                when.promote_rollout_full().await?;
            } else {
                when.promote_rollout().await?;
            }
        }
        Commands::Abort { name } => {
            attach(common, name)?.abort_rollout().await?;
        }
        Commands::Retry { name } => {
            attach(common, name)?.retry_rollout().await?;
        }
        Commands::Restart { name } => {
            attach(common, name)?.restart_rollout().await?;
        }
        Commands::Delete { name } => {
            attach(common, name)?.delete_rollout().await?;
        }
        Commands::WaitStatus { name, status, timeout } => {
            let timeout = timeout_or_default(timeout);
            let condition = predicates::status_condition(&status);
            let wait = attach(common, name)?.wait_for_rollout_condition(predicates::status_is(&status), &condition, timeout);
            tokio::select! {
                res = wait => { res?; }
                _ = signal::ctrl_c() => warn!("Ctrl-C received; abandoning wait"),
            }
        }
        Commands::WaitStep { name, index, timeout } => {
            let timeout = timeout_or_default(timeout);
            let condition = predicates::step_index_condition(index);
            let wait = attach(common, name)?.wait_for_rollout_condition(predicates::canary_step_index_is(index), &condition, timeout);
            tokio::select! {
                res = wait => { res?; }
                _ = signal::ctrl_c() => warn!("Ctrl-C received; abandoning wait"),
            }
        }
        Commands::Status { name } => {
            let target = RolloutRef::new(config.namespace.clone(), name);
            let obj = ops.get(&target).await?;
            let ro = Rollout::from_object(&obj).with_context(|| format!("decoding rollout {}", target))?;
            let row = StatusRow {
                namespace: &target.namespace,
                name: &target.name,
                status: ro.phase().to_string(),
                step: ro.status.current_step_index,
                steps: ro.canary_steps().map(<[_]>::len),
                aborted: ro.status.abort,
            };
            match cli.output {
                Output::Human => {
                    println!("NAMESPACE   NAME                 STATUS       STEP");
                    let step = match (row.step, row.steps) {
                        (Some(i), Some(n)) => format!("{}/{}", i, n),
                        _ => "-".to_string(),
                    };
                    println!("{:<11} {:<20} {:<12} {}", row.namespace, row.name, row.status, step);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&row)?),
            }
        }
    }

    Ok(())
}
