//! Core record model for wdsync: source rows, canonical records and field translation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CRATE_NAME: &str = "wdsync-core";

/// Canonical field marking whether a record is live in the config store.
pub const ACTIVE_FIELD: &str = "active";
pub const ACTIVE_YES: &str = "Y";
pub const ACTIVE_NO: &str = "N";

/// One flat row as returned by the services API.
pub type SourceRecord = Map<String, Value>;

/// Lower-cased external key naming one person or cost center for a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: &str) -> Self {
        Self(raw.to_lowercase())
    }

    /// Strings and numbers are accepted; anything else cannot key a record.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::new(s)),
            Value::Number(n) => Some(Self::new(&n.to_string())),
            _ => None,
        }
    }

    pub fn from_record(record: &SourceRecord, field: &str) -> Result<Self, TranslateError> {
        record
            .get(field)
            .and_then(Self::from_value)
            .ok_or_else(|| TranslateError::MissingField(field.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identifier {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized record as stored in the config service. Keys serialize in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalRecord(BTreeMap<String, Value>);

impl CanonicalRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Copy every field of `other` over this record.
    pub fn merge(&mut self, other: CanonicalRecord) {
        self.0.extend(other.0);
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `true` only when `active` is present and equal to `"Y"`.
    pub fn is_active(&self) -> bool {
        self.get(ACTIVE_FIELD).and_then(Value::as_str) == Some(ACTIVE_YES)
    }

    /// Full copy of this record with `active` flipped to `"N"`.
    pub fn deactivated(&self) -> Self {
        let mut copy = self.clone();
        copy.insert(ACTIVE_FIELD, Value::String(ACTIVE_NO.to_string()));
        copy
    }
}

impl FromIterator<(String, Value)> for CanonicalRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Static mapping from source field name to canonical field name, applied in order.
#[derive(Debug, Clone, Copy)]
pub struct TranslationTable {
    entries: &'static [(&'static str, &'static str)],
}

impl TranslationTable {
    pub const fn new(entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &'static [(&'static str, &'static str)] {
        self.entries
    }

    pub fn source_fields(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|(source, _)| *source)
    }

    pub fn canonical_fields(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|(_, canonical)| *canonical)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-record failures. None of these abort a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("missing required source field {0}")]
    MissingField(String),
    #[error("unknown location code {0}")]
    UnknownLocation(String),
}

/// Copy every mapped field of `source` into a new canonical record.
///
/// Presence is all that is checked: a field holding `null` is copied as `null`.
/// The first absent source field in table order is reported.
pub fn translate(
    source: &SourceRecord,
    table: &TranslationTable,
) -> Result<CanonicalRecord, TranslateError> {
    let mut record = CanonicalRecord::new();
    for (source_field, canonical_field) in table.entries() {
        let value = source
            .get(*source_field)
            .ok_or_else(|| TranslateError::MissingField((*source_field).to_string()))?;
        record.insert(*canonical_field, value.clone());
    }
    Ok(record)
}

/// Records previously stored in the config service, read once at run start.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnownSnapshot {
    records: BTreeMap<Identifier, CanonicalRecord>,
}

impl KnownSnapshot {
    pub fn new(records: BTreeMap<Identifier, CanonicalRecord>) -> Self {
        Self { records }
    }

    pub fn lookup(&self, id: &Identifier) -> Option<&CanonicalRecord> {
        self.records.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &CanonicalRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<(Identifier, CanonicalRecord)> for KnownSnapshot {
    fn from_iter<I: IntoIterator<Item = (Identifier, CanonicalRecord)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Records built from the current source fetch. Later inserts for the same
/// identifier replace earlier ones.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct IncomingSet {
    records: BTreeMap<Identifier, CanonicalRecord>,
}

impl IncomingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: Identifier, record: CanonicalRecord) -> Option<CanonicalRecord> {
        self.records.insert(id, record)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Upsert every incoming record individually.
    Full,
    /// Upsert only identifiers absent from the snapshot.
    Quick,
    /// Push the whole incoming set as one bulk replace.
    Rebuild,
}

/// How a run writes to the config store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileMode {
    pub scan: ScanMode,
    /// Deactivate known records that vanished from the source.
    pub backcheck: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("--rebuild cannot be combined with --quick or --backcheck")]
pub struct ModeConflict;

impl ReconcileMode {
    pub const fn full() -> Self {
        Self {
            scan: ScanMode::Full,
            backcheck: false,
        }
    }

    pub const fn quick() -> Self {
        Self {
            scan: ScanMode::Quick,
            backcheck: false,
        }
    }

    pub const fn rebuild() -> Self {
        Self {
            scan: ScanMode::Rebuild,
            backcheck: false,
        }
    }

    pub const fn backcheck() -> Self {
        Self {
            scan: ScanMode::Full,
            backcheck: true,
        }
    }

    pub fn from_flags(quick: bool, rebuild: bool, backcheck: bool) -> Result<Self, ModeConflict> {
        match (quick, rebuild, backcheck) {
            (_, true, _) if quick || backcheck => Err(ModeConflict),
            (_, true, _) => Ok(Self::rebuild()),
            (true, _, backcheck) => Ok(Self {
                scan: ScanMode::Quick,
                backcheck,
            }),
            (false, false, backcheck) => Ok(Self {
                scan: ScanMode::Full,
                backcheck,
            }),
        }
    }

    pub fn is_rebuild(&self) -> bool {
        self.scan == ScanMode::Rebuild
    }
}

impl Default for ReconcileMode {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scan = match self.scan {
            ScanMode::Full => "full",
            ScanMode::Quick => "quick",
            ScanMode::Rebuild => "rebuild",
        };
        if self.backcheck {
            write!(f, "{scan}+backcheck")
        } else {
            f.write_str(scan)
        }
    }
}

/// Counts reported by the config store for one accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertOutcome {
    pub fn inserted(n: u64) -> Self {
        Self {
            inserted: n,
            updated: 0,
        }
    }

    pub fn updated(n: u64) -> Self {
        Self {
            inserted: 0,
            updated: n,
        }
    }
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReconcileResult {
    pub inserted_count: u64,
    pub updated_count: u64,
    pub skipped_missing_field_count: u64,
    pub skipped_unknown_location_count: u64,
    pub new_identifier_count: u64,
    pub deactivated_count: u64,
    pub rejected_count: u64,
    pub incoming_count: u64,
}

impl ReconcileResult {
    pub fn absorb(&mut self, outcome: UpsertOutcome) {
        self.inserted_count += outcome.inserted;
        self.updated_count += outcome.updated;
    }

    pub fn record_skip(&mut self, err: &TranslateError) {
        match err {
            TranslateError::MissingField(_) => self.skipped_missing_field_count += 1,
            TranslateError::UnknownLocation(_) => self.skipped_unknown_location_count += 1,
        }
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped_missing_field_count + self.skipped_unknown_location_count
    }
}
