//! Sync pipeline: fetch the snapshot and source rows, reconcile, push changes.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;
use wdsync_adapters::{CostCenterAdapter, RecordAdapter, RecordKind, WorkerAdapter, LOCATIONS_ENDPOINT};
use wdsync_core::{ReconcileMode, ReconcileResult};
use wdsync_storage::{ConfigStore, HttpClientConfig, RecordSource, Services};

mod reconcile;
#[cfg(test)]
mod testing;

pub use reconcile::Reconciler;

pub const CRATE_NAME: &str = "wdsync-sync";

pub const DEFAULT_CONFIG_URL: &str = "http://config.int.janelia.org/";
pub const DEFAULT_SERVICES_NAME: &str = "hhmi-services";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub config_url: String,
    pub services_name: String,
    pub services_token: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: Option<u64>,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            config_url: std::env::var("WDSYNC_CONFIG_URL")
                .unwrap_or_else(|_| DEFAULT_CONFIG_URL.to_string()),
            services_name: std::env::var("WDSYNC_SERVICES_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICES_NAME.to_string()),
            services_token: std::env::var("WDSYNC_SERVICES_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            user_agent: std::env::var("WDSYNC_USER_AGENT")
                .unwrap_or_else(|_| format!("wdsync/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: std::env::var("WDSYNC_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout_secs.map(Duration::from_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub kind: RecordKind,
    pub config_name: String,
    pub mode: ReconcileMode,
    pub known_count: usize,
    pub source_count: usize,
    pub result: ReconcileResult,
}

/// Build the adapter for `kind`, fetching whatever lookup data it joins against.
pub async fn adapter_for_kind(
    kind: RecordKind,
    source: &dyn RecordSource,
) -> Result<Box<dyn RecordAdapter>> {
    match kind {
        RecordKind::Workers => Ok(Box::new(WorkerAdapter)),
        RecordKind::CostCenters => {
            let locations = source
                .fetch_records(LOCATIONS_ENDPOINT)
                .await
                .context("fetching locations")?;
            info!(count = locations.len(), "found locations");
            Ok(Box::new(CostCenterAdapter::from_locations(locations)))
        }
    }
}

/// Run one reconciliation for `kind` against already-connected collaborators.
pub async fn sync_kind(
    source: &dyn RecordSource,
    store: &dyn ConfigStore,
    kind: RecordKind,
    mode: ReconcileMode,
) -> Result<SyncRunSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("reconcile", %run_id, config = kind.config_name(), %mode);
    run_in_span(run_id, source, store, kind, mode)
        .instrument(span)
        .await
}

async fn run_in_span(
    run_id: Uuid,
    source: &dyn RecordSource,
    store: &dyn ConfigStore,
    kind: RecordKind,
    mode: ReconcileMode,
) -> Result<SyncRunSummary> {
    let started_at = Utc::now();
    let config_name = kind.config_name();

    let known = store
        .fetch_snapshot(config_name)
        .await
        .with_context(|| format!("reading config {config_name}"))?;
    info!("found {} entries in existing configuration", known.len());

    let adapter = adapter_for_kind(kind, source).await?;
    let rows = source
        .fetch_records(kind.source_endpoint())
        .await
        .with_context(|| format!("fetching {kind}"))?;
    info!("found {} {kind} in source", rows.len());

    let known_count = known.len();
    let source_count = rows.len();
    let result = Reconciler::new(adapter.as_ref(), store)
        .reconcile(&known, rows, mode)
        .await?;

    Ok(SyncRunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        kind,
        config_name: config_name.to_string(),
        mode,
        known_count,
        source_count,
        result,
    })
}

pub struct SyncPipeline {
    config: SyncConfig,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub async fn run_once(&self, kind: RecordKind, mode: ReconcileMode) -> Result<SyncRunSummary> {
        let services = Services::discover(
            &self.config.http_client_config(),
            &self.config.config_url,
            &self.config.services_name,
            self.config.services_token.clone(),
        )
        .await?;
        sync_kind(&services.source, &services.store, kind, mode).await
    }
}

pub async fn run_sync_once_from_env(kind: RecordKind, mode: ReconcileMode) -> Result<SyncRunSummary> {
    SyncPipeline::new(SyncConfig::from_env()).run_once(kind, mode).await
}
