use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use kubesnap_collect::{CancellationToken, CollectReport, Collector};
use kubesnap_core::{CollectConfig, Diagnostic, KeyPolicy};
use kubesnap_kubehub::{ControlPlane, KubeControlPlane};
use kubesnap_persist::PersistReport;
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kubesnap", version, about = "Snapshot every listable resource in a cluster to JSON files")]
struct Cli {
    /// Path to the kubeconfig used to reach the cluster
    kubeconfig: PathBuf,

    /// Output directory (created if missing)
    #[arg(long = "out", env = "KUBESNAP_OUT", default_value = "out")]
    out: PathBuf,

    /// Kubeconfig context (default: the file's current context)
    #[arg(long = "context", env = "KUBESNAP_CONTEXT")]
    context: Option<String>,

    /// Restrict namespaced types to one namespace; cluster-scoped types are still collected
    #[arg(short = 'n', long = "namespace", env = "KUBESNAP_NAMESPACE")]
    namespace: Option<String>,

    /// Maximum concurrent list calls
    #[arg(long = "concurrency", env = "KUBESNAP_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    /// Stop after this many seconds, discovery included, and keep what was collected
    #[arg(long = "timeout", env = "KUBESNAP_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// How files are named when types share a resource name
    #[arg(long = "key-policy", value_enum, default_value_t = KeyMode::ResourceName)]
    key_policy: KeyMode,

    /// Drop metadata.managedFields from every object
    #[arg(long = "strip-managed-fields", action = ArgAction::SetTrue)]
    strip_managed_fields: bool,

    /// Items per list page; 0 disables paging
    #[arg(long = "page-size", env = "KUBESNAP_PAGE_SIZE", default_value_t = 500)]
    page_size: u32,

    /// Run summary format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
    output: Output,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum KeyMode {
    /// `<resource>.json`; later API versions/groups overwrite earlier ones
    ResourceName,
    /// `<resource>.<version>[.<group>].json`
    Qualified,
}

impl From<KeyMode> for KeyPolicy {
    fn from(m: KeyMode) -> Self {
        match m {
            KeyMode::ResourceName => KeyPolicy::ResourceName,
            KeyMode::Qualified => KeyPolicy::Qualified,
        }
    }
}

impl Cli {
    fn collect_config(&self) -> CollectConfig {
        CollectConfig {
            namespace: self.namespace.clone(),
            concurrency: self.concurrency,
            timeout: self.timeout_secs.map(Duration::from_secs),
            key_policy: self.key_policy.into(),
            strip_managed_fields: self.strip_managed_fields,
            page_size: (self.page_size > 0).then_some(self.page_size),
        }
    }
}

fn init_tracing() {
    let env = std::env::var("KUBESNAP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUBESNAP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KUBESNAP_METRICS_ADDR; expected host:port");
        }
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    out: &'a std::path::Path,
    files: usize,
    records: usize,
    #[serde(flatten)]
    collection: &'a CollectReport,
    persist_failures: Vec<Diagnostic>,
}

fn print_summary(output: Output, report: &CollectReport, persisted: &PersistReport) -> Result<()> {
    let persist_failures: Vec<Diagnostic> = persisted.failures.iter().map(Diagnostic::from).collect();
    match output {
        Output::Human => {
            println!(
                "{} files, {} objects written to {} ({} types listed, {} empty, {} failed{})",
                persisted.written.len(),
                persisted.records,
                persisted.dir.display(),
                report.discovered,
                report.empty,
                report.failed,
                if report.cancelled { format!(", {} skipped: cancelled", report.skipped) } else { String::new() },
            );
            for d in report.diagnostics.iter().chain(persist_failures.iter()) {
                println!("! {:<10} {}: {}", d.stage, d.target, d.message);
            }
        }
        Output::Json => {
            let summary = Summary {
                out: &persisted.dir,
                files: persisted.written.len(),
                records: persisted.records,
                collection: report,
                persist_failures,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

/// Collect from `plane` and write the snapshot to `cli.out`.
///
/// A discovery failure returns before the output directory is touched.
async fn run(cli: &Cli, plane: Arc<dyn ControlPlane>, cancel: CancellationToken) -> Result<(CollectReport, PersistReport)> {
    let report = match Collector::new(plane, cli.collect_config()).collect(cancel).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "discovery failed; nothing collected");
            return Err(e).context("discovering API resources");
        }
    };
    let persisted = kubesnap_persist::persist(&report.snapshot, &cli.out).context("persisting snapshot")?;
    info!(out = %cli.out.display(), "Kubernetes cluster state saved");
    Ok((report, persisted))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    info!(kubeconfig = %cli.kubeconfig.display(), out = %cli.out.display(), "snapshot invoked");

    let client = kubesnap_kubehub::connect(&cli.kubeconfig, cli.context.as_deref())
        .await
        .with_context(|| format!("connecting with kubeconfig {}", cli.kubeconfig.display()))?;
    let plane = Arc::new(KubeControlPlane::new(client));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; keeping what was collected so far");
                cancel.cancel();
            }
        }
    });

    let (report, persisted) = run(&cli, plane, cancel).await?;
    print_summary(cli.output, &report, &persisted)?;
    Ok(())
}
