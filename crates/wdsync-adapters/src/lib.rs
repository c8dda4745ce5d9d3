//! Record adapters: how each services API row type becomes a canonical config record.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use wdsync_core::{translate, CanonicalRecord, Identifier, SourceRecord, TranslateError, TranslationTable};

pub const CRATE_NAME: &str = "wdsync-adapters";

pub const WORKER_DETAILS_ENDPOINT: &str = "IT/WD-hcm/wdworkerdetails";
pub const COST_CENTERS_ENDPOINT: &str = "IT/WD-fin/lookups/costcenters";
pub const LOCATIONS_ENDPOINT: &str = "IT/WD-hcm/locations";

pub const WORKER_ID_FIELD: &str = "WORKERUSERID";
pub const MANAGER_ID_FIELD: &str = "MANAGERUSERID";
pub const MANAGER_CANONICAL_FIELD: &str = "manager_userid";

pub const WORKER_TABLE: TranslationTable = TranslationTable::new(&[
    ("EMPLOYEEID", "id"),
    ("PREFERREDFIRSTNAME", "first"),
    ("PREFERREDLASTNAME", "last"),
    ("EMAILADDRESS", "email"),
    ("PHONE1", "phone"),
    ("LOCATIONNAME", "location"),
    ("BUILDING", "building"),
    ("WORKSPACE_NAME", "workspace"),
    ("COSTCENTER", "cost_center"),
    ("SUBROLLUP_GROUP", "rollup_group"),
    ("TEAMCODE", "team"),
    ("SUPORGNAME", "organization"),
    ("JOBTITLE", "title"),
    ("BUSINESSTITLE", "business_title"),
    ("DEPARTMENTADDRESS1", "address"),
    ("DEPARTMENTADDRESS2", "address2"),
    ("DEPARTMENTADDRESS3", "address3"),
    ("DEPARTMENTCOUNTRY", "country"),
    ("DEPARTMENTCITY", "city"),
    ("DEPARTMENTSTATE", "state"),
    ("DEPARTMENTPOSTALCD", "zip"),
    ("ACTIVEFLAG", "active"),
]);

pub const COST_CENTER_ID_FIELD: &str = "CostCenter";
pub const COST_CENTER_LOCATION_FIELD: &str = "DefaultLocationID";
pub const LOCATION_CODE_FIELD: &str = "LocationCode";
pub const LOCATION_ADDRESS2_FIELD: &str = "PrimaryAddressLine2";

pub const COST_CENTER_TABLE: TranslationTable = TranslationTable::new(&[
    ("CCDescr", "organization"),
    ("Status", "status"),
    ("DefaultLocationName", "location"),
]);

/// Fields taken from the cost center's default location.
pub const LOCATION_TABLE: TranslationTable = TranslationTable::new(&[
    ("PrimaryAddressLine1", "address"),
    ("City", "city"),
    ("State", "state"),
    ("PostalCode", "zip"),
    ("Country", "country"),
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Workers,
    CostCenters,
}

impl RecordKind {
    /// Name of the configuration this kind is stored under.
    pub fn config_name(self) -> &'static str {
        match self {
            Self::Workers => "workday",
            Self::CostCenters => "cost_centers",
        }
    }

    pub fn definition(self) -> Option<&'static str> {
        match self {
            Self::Workers => None,
            Self::CostCenters => Some("Cost centers"),
        }
    }

    pub fn source_endpoint(self) -> &'static str {
        match self {
            Self::Workers => WORKER_DETAILS_ENDPOINT,
            Self::CostCenters => COST_CENTERS_ENDPOINT,
        }
    }

    /// Word used in progress logs ("j.doe is a new user").
    pub fn noun(self) -> &'static str {
        match self {
            Self::Workers => "user",
            Self::CostCenters => "cost center",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Workers => "workers",
            Self::CostCenters => "cost-centers",
        })
    }
}

pub trait RecordAdapter: Send + Sync {
    fn kind(&self) -> RecordKind;

    fn identifier_field(&self) -> &'static str;

    fn translation_table(&self) -> &TranslationTable;

    fn identify(&self, row: &SourceRecord) -> Result<Identifier, TranslateError> {
        Identifier::from_record(row, self.identifier_field())
    }

    fn translate(&self, row: &SourceRecord) -> Result<CanonicalRecord, TranslateError>;
}

/// Worker details rows keyed by `WORKERUSERID`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerAdapter;

impl RecordAdapter for WorkerAdapter {
    fn kind(&self) -> RecordKind {
        RecordKind::Workers
    }

    fn identifier_field(&self) -> &'static str {
        WORKER_ID_FIELD
    }

    fn translation_table(&self) -> &TranslationTable {
        &WORKER_TABLE
    }

    fn translate(&self, row: &SourceRecord) -> Result<CanonicalRecord, TranslateError> {
        let mut record = translate(row, self.translation_table())?;
        let manager = Identifier::from_record(row, MANAGER_ID_FIELD)?;
        record.insert(MANAGER_CANONICAL_FIELD, Value::String(manager.into()));
        Ok(record)
    }
}

/// Cost center rows joined against the locations lookup.
#[derive(Debug, Clone, Default)]
pub struct CostCenterAdapter {
    locations: BTreeMap<String, SourceRecord>,
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl CostCenterAdapter {
    pub fn from_locations(rows: Vec<SourceRecord>) -> Self {
        let total = rows.len();
        let mut locations = BTreeMap::new();
        for row in rows {
            match row.get(LOCATION_CODE_FIELD).and_then(scalar_key) {
                Some(code) => {
                    locations.insert(code, row);
                }
                None => warn!(?row, "location without {LOCATION_CODE_FIELD}"),
            }
        }
        info!(found = total, saved = locations.len(), "indexed locations");
        Self { locations }
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }
}

impl RecordAdapter for CostCenterAdapter {
    fn kind(&self) -> RecordKind {
        RecordKind::CostCenters
    }

    fn identifier_field(&self) -> &'static str {
        COST_CENTER_ID_FIELD
    }

    fn translation_table(&self) -> &TranslationTable {
        &COST_CENTER_TABLE
    }

    fn translate(&self, row: &SourceRecord) -> Result<CanonicalRecord, TranslateError> {
        let code = row
            .get(COST_CENTER_LOCATION_FIELD)
            .and_then(scalar_key)
            .ok_or_else(|| TranslateError::MissingField(COST_CENTER_LOCATION_FIELD.to_string()))?;
        let location = self
            .locations
            .get(&code)
            .ok_or(TranslateError::UnknownLocation(code))?;

        let mut record = translate(row, self.translation_table())?;
        record.merge(translate(location, &LOCATION_TABLE)?);
        if let Some(address2) = location.get(LOCATION_ADDRESS2_FIELD) {
            record.insert("address2", address2.clone());
        }
        Ok(record)
    }
}
