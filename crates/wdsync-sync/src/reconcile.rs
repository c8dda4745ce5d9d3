//! Decide which source records to push, and which stored records to retire.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use wdsync_adapters::RecordAdapter;
use wdsync_core::{
    IncomingSet, KnownSnapshot, ReconcileMode, ReconcileResult, ScanMode, SourceRecord,
    UpsertOutcome,
};
use wdsync_storage::{ConfigStore, UpsertRequest};

pub struct Reconciler<'a> {
    adapter: &'a dyn RecordAdapter,
    store: &'a dyn ConfigStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(adapter: &'a dyn RecordAdapter, store: &'a dyn ConfigStore) -> Self {
        Self { adapter, store }
    }

    /// One pass over the sorted source rows, then a bulk push (rebuild) or a
    /// deactivation pass (backcheck) as the mode asks.
    ///
    /// Per-record problems are logged and counted. Only transport-level
    /// failures talking to the store come back as `Err`.
    pub async fn reconcile(
        &self,
        known: &KnownSnapshot,
        incoming_raw: Vec<SourceRecord>,
        mode: ReconcileMode,
    ) -> Result<ReconcileResult> {
        let kind = self.adapter.kind();
        let config_name = kind.config_name();
        let definition = kind.definition();

        let mut rows: Vec<_> = incoming_raw
            .into_iter()
            .map(|row| (self.adapter.identify(&row), row))
            .collect();
        // Stable: duplicates keep source order, so the last one wins.
        rows.sort_by(|(a, _), (b, _)| a.as_ref().ok().cmp(&b.as_ref().ok()));

        let mut result = ReconcileResult {
            incoming_count: rows.len() as u64,
            ..Default::default()
        };
        let mut incoming = IncomingSet::new();
        let mut seen = BTreeSet::new();

        for (id, row) in rows {
            let id = match id {
                Ok(id) => id,
                Err(err) => {
                    warn!(error = %err, ?row, "skipping source record");
                    result.record_skip(&err);
                    continue;
                }
            };
            seen.insert(id.clone());

            let record = match self.adapter.translate(&row) {
                Ok(record) => record,
                Err(err) => {
                    error!(%id, error = %err, ?row, "skipping source record");
                    result.record_skip(&err);
                    continue;
                }
            };

            let stored = known.lookup(&id);
            if stored.is_none() && !incoming.contains(&id) {
                info!("{id} is a new {}", kind.noun());
                result.new_identifier_count += 1;
            }
            debug!(%id, ?record, "translated");

            match mode.scan {
                ScanMode::Rebuild => {}
                ScanMode::Quick if stored.is_some() => {}
                ScanMode::Full | ScanMode::Quick => {
                    let request = UpsertRequest::record(config_name, &id, &record, definition)
                        .with_context(|| format!("encoding record {id}"))?;
                    self.push(&request, &mut result).await?;
                }
            }
            incoming.insert(id, record);
        }
        info!(entries = incoming.len(), "built incoming set");

        if mode.is_rebuild() {
            info!("{config_name} config will contain {} entries", incoming.len());
            let request = UpsertRequest::bulk(config_name, &incoming, definition)
                .context("encoding bulk payload")?;
            self.push(&request, &mut result).await?;
        }

        if mode.backcheck {
            for (id, stored) in known.iter() {
                if seen.contains(id) {
                    continue;
                }
                if !stored.is_active() {
                    debug!(%id, "absent from source, already inactive");
                    continue;
                }
                info!("{id} is no longer in the source; deactivating");
                let request =
                    UpsertRequest::record(config_name, id, &stored.deactivated(), definition)
                        .with_context(|| format!("encoding deactivation of {id}"))?;
                if self.push(&request, &mut result).await?.is_some() {
                    result.deactivated_count += 1;
                }
            }
        }

        Ok(result)
    }

    async fn push(
        &self,
        request: &UpsertRequest,
        result: &mut ReconcileResult,
    ) -> Result<Option<UpsertOutcome>> {
        match self.store.upsert(request).await {
            Ok(outcome) => {
                result.absorb(outcome);
                Ok(Some(outcome))
            }
            Err(err) if err.is_recoverable() => {
                error!(endpoint = %request.endpoint(), error = %err, "config store rejected write");
                result.rejected_count += 1;
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("writing {}", request.endpoint())),
        }
    }
}
