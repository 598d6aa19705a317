//! Command-line interface for wildscan.
//!
//! Provides commands for following the live store, printing the current
//! case view, changing case status, acknowledging cases, inspecting
//! duplicate evidence and generating risk assessments.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;

use crate::adapters::{Adapter, DocumentStore, GeminiAdapter, HttpFetcher, LocalStore};
use crate::config::{self, ResolvedConfig};
use crate::core::query::{available_sources, DetectionFilter, SummaryStats};
use crate::core::reconcile::{DashboardView, ReconcileHandle, ReconcileOptions, Reconciler};
use crate::core::risk::{AssessmentOrigin, RiskAssessor};
use crate::core::CancelFlag;
use crate::domain::detection::{CaseStatus, Detection, Priority};
use crate::domain::session::SessionState;
use crate::evidence::HashingService;

pub mod evidence;
pub mod report;

/// How long one-shot commands wait for every source to deliver
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// wildscan - Live case reconciliation for wildlife-trafficking enforcement
#[derive(Parser, Debug)]
#[command(name = "wildscan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Officer the session is opened for
    #[arg(long, global = true, env = "WILDSCAN_OFFICER", default_value = "duty-officer")]
    pub officer: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow the live store and report new cases until Ctrl-C
    Watch,

    /// Print the current case view
    Cases {
        /// Search species, location, source and case id
        #[arg(short, long)]
        search: Option<String>,

        /// Severities to include (repeatable; default all)
        #[arg(short, long, value_enum)]
        priority: Vec<PriorityArg>,

        /// Only this source ("All" for every source)
        #[arg(long)]
        source: Option<String>,

        /// Minimum model confidence (0.0 - 1.0)
        #[arg(long, default_value = "0")]
        min_confidence: f64,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Set or clear a case's status
    Status {
        /// Case ID
        case_id: String,

        /// New status
        #[arg(value_enum)]
        status: StatusArg,
    },

    /// Acknowledge a case's notification
    Read {
        /// Case ID
        case_id: String,
    },

    /// Print a risk assessment for a case
    Assess {
        /// Case ID
        case_id: String,
    },

    /// Show resolved configuration (debug)
    Config,

    /// Inspect evidence and duplicate groups
    Evidence {
        #[command(subcommand)]
        command: evidence::EvidenceCommands,
    },
}

/// Severity for CLI (maps to Priority)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::High => Priority::High,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::Low => Priority::Low,
        }
    }
}

/// Status for CLI; `clear` unsets the status
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Pending,
    Investigating,
    Resolved,
    Clear,
}

impl From<StatusArg> for Option<CaseStatus> {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Pending => Some(CaseStatus::Pending),
            StatusArg::Investigating => Some(CaseStatus::Investigating),
            StatusArg::Resolved => Some(CaseStatus::Resolved),
            StatusArg::Clear => None,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let officer = self.officer;
        match self.command {
            Commands::Watch => watch(&officer).await,
            Commands::Cases {
                search,
                priority,
                source,
                min_confidence,
                json,
            } => {
                let mut filter = DetectionFilter {
                    search: search.unwrap_or_default(),
                    min_confidence,
                    ..DetectionFilter::default()
                }
                .with_source(source.as_deref());
                if !priority.is_empty() {
                    filter.priorities = priority.into_iter().map(Priority::from).collect();
                }
                list_cases(&officer, &filter, json).await
            }
            Commands::Status { case_id, status } => {
                set_status(&officer, &case_id, status.into()).await
            }
            Commands::Read { case_id } => mark_read(&officer, &case_id).await,
            Commands::Assess { case_id } => assess(&officer, &case_id).await,
            Commands::Config => show_config(),
            Commands::Evidence { command } => execute_evidence(&officer, command).await,
        }
    }
}

/// Execute evidence subcommands
async fn execute_evidence(officer: &str, command: evidence::EvidenceCommands) -> Result<()> {
    match command {
        evidence::EvidenceCommands::Duplicates { hash } => {
            evidence::execute_duplicates(officer, &hash).await
        }
        evidence::EvidenceCommands::Show { case_id } => {
            evidence::execute_show(officer, &case_id).await
        }
        evidence::EvidenceCommands::Hash { reference } => evidence::execute_hash(&reference).await,
    }
}

/// Sign in and start a loop against the configured local store
pub(crate) async fn start_session(officer: &str) -> Result<ReconcileHandle> {
    let cfg = config::config()?;
    let store: Arc<dyn DocumentStore> = Arc::new(LocalStore::open(&cfg.store_dir));

    let hasher = HashingService::new(Arc::new(HttpFetcher::new(cfg.hashing.fetch_timeout())))
        .with_support(cfg.hashing.enabled)
        .with_write_back(Arc::clone(&store), cfg.collections.evidence.clone());

    let reconciler = Reconciler::new(store, Arc::new(hasher), ReconcileOptions::from_config(cfg));
    let session = SessionState::sign_in(officer);

    reconciler
        .start(&session)
        .await
        .context("Failed to start reconciliation")
}

/// Wait until every source has delivered and background hashing is idle
pub(crate) async fn settled(handle: &ReconcileHandle) -> Result<Arc<DashboardView>> {
    tokio::time::timeout(SETTLE_TIMEOUT, handle.wait_for(DashboardView::is_settled))
        .await
        .context("Timed out waiting for the store")?
        .context("Reconciliation stopped before the view settled")
}

/// Follow the store until Ctrl-C
async fn watch(officer: &str) -> Result<()> {
    let handle = start_session(officer).await?;
    let mut alerts = handle.alerts();
    let mut views = handle.watch();
    let mut connection = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    eprintln!("Watching as {} (Ctrl-C to stop)", officer);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            alert = alerts.recv() => match alert {
                Ok(alert) => println!("{}", report::alert_line(&alert)),
                Err(RecvError::Lagged(missed)) => eprintln!("({} alerts missed)", missed),
                Err(RecvError::Closed) => break,
            },
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = Arc::clone(&views.borrow_and_update());
                let current = view.connection();
                if connection.as_ref() != Some(&current) {
                    eprintln!("[{}]", current);
                    connection = Some(current);
                }
                eprintln!(
                    "pass {}: {} cases, {} unread, {} hashing",
                    view.pass,
                    view.detections.len(),
                    view.unread_count(),
                    view.hashing_in_flight,
                );
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Print the filtered view once every source has settled
async fn list_cases(officer: &str, filter: &DetectionFilter, json: bool) -> Result<()> {
    let handle = start_session(officer).await?;
    let view = settled(&handle).await?;
    handle.shutdown().await;

    let shown = filter.apply(&view.detections);
    let stats = SummaryStats::compute(&shown, chrono::Utc::now());

    if json {
        let detections: Vec<&Detection> = shown.iter().map(|d| d.as_ref()).collect();
        let out = serde_json::json!({
            "connection": view.connection(),
            "sources": available_sources(&view.detections),
            "stats": stats,
            "detections": detections,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    eprintln!("[{}]", view.connection());
    println!("{}", report::detection_table(&shown));
    println!();
    println!("{}", report::stats_block(&stats));
    Ok(())
}

/// Change a case's status and report both writes
async fn set_status(officer: &str, case_id: &str, status: Option<CaseStatus>) -> Result<()> {
    let handle = start_session(officer).await?;
    let view = settled(&handle).await?;

    if view.detection(case_id).is_none() {
        handle.shutdown().await;
        anyhow::bail!("Unknown case: {}", case_id);
    }

    let outcome = handle.set_status_confirmed(case_id, status).await;
    handle.shutdown().await;

    let report = outcome.context("Reconciliation stopped before the status was written")?;
    println!("{}", report::status_report(&report));
    if !report.is_consistent() {
        std::process::exit(1);
    }
    Ok(())
}

/// Acknowledge a case and wait for the write to be queued
async fn mark_read(officer: &str, case_id: &str) -> Result<()> {
    let handle = start_session(officer).await?;
    let view = settled(&handle).await?;

    if view.detection(case_id).is_none() {
        handle.shutdown().await;
        anyhow::bail!("Unknown case: {}", case_id);
    }

    handle.mark_read(case_id);
    let acknowledged = tokio::time::timeout(
        SETTLE_TIMEOUT,
        handle.wait_for(|v| v.detection(case_id).map(|d| !d.unread).unwrap_or(false)),
    )
    .await;
    // Shutdown drains the queued read-state write
    handle.shutdown().await;

    acknowledged.context("Timed out acknowledging the case")?;
    println!("{} marked as read", case_id);
    Ok(())
}

fn risk_assessor(cfg: &ResolvedConfig) -> RiskAssessor {
    let adapter: Option<Arc<dyn Adapter>> = cfg.enrichment.api_key.as_ref().map(|key| {
        Arc::new(
            GeminiAdapter::new(key.clone())
                .with_endpoint(cfg.enrichment.endpoint.clone())
                .with_model(cfg.enrichment.model.clone()),
        ) as Arc<dyn Adapter>
    });
    RiskAssessor::new(adapter, cfg.enrichment.model.clone(), cfg.enrichment.timeout())
}

/// Print the risk assessment for one case
async fn assess(officer: &str, case_id: &str) -> Result<()> {
    let cfg = config::config()?;
    let handle = start_session(officer).await?;
    let view = settled(&handle).await?;
    handle.shutdown().await;

    let detection = view
        .detection(case_id)
        .with_context(|| format!("Unknown case: {}", case_id))?;

    let cancel = CancelFlag::new();
    let assessment = risk_assessor(cfg)
        .assess(detection, &cancel)
        .await
        .context("Assessment was cancelled")?;

    println!("Case {} - {} @ {}", detection.id, detection.animal_type, detection.location_name);
    println!();
    println!("{}", assessment.text);
    if assessment.origin == AssessmentOrigin::Fallback {
        eprintln!();
        eprintln!("[local fallback: {}]", assessment
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no model answer".to_string()));
    }
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("wildscan configuration");
    println!("──────────────────────");
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  Store: {}", cfg.store_dir.display());
    println!();
    println!("Collections:");
    println!("  Cases:         {}", cfg.collections.cases);
    println!("  Evidence:      {}", cfg.collections.evidence);
    println!("  Status:        {}", cfg.collections.case_status);
    println!("  Read-state:    {}", cfg.collections.case_reads);
    println!("  Notifications: {}", cfg.collections.notifications);
    println!();
    println!("Hashing:");
    println!("  Enabled:        {}", cfg.hashing.enabled);
    println!("  Fetch timeout:  {}s", cfg.hashing.fetch_timeout_seconds);
    println!("  Max concurrent: {}", cfg.hashing.max_concurrent);
    println!();
    println!("Enrichment:");
    println!("  Model:    {}", cfg.enrichment.model);
    println!("  Endpoint: {}", cfg.enrichment.endpoint);
    println!("  Timeout:  {}s", cfg.enrichment.timeout_seconds);
    println!(
        "  API key:  {}",
        if cfg.enrichment.api_key.is_some() { "set" } else { "(not set - fallback summaries only)" }
    );
    println!();
    println!("Notifications:");
    println!("  System alerts: {}", cfg.notifications.system_alerts);
    println!("  Toast limit:   {}", cfg.notifications.toast_limit);

    Ok(())
}
