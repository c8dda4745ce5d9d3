//! HTTP collaborators for wdsync: the services API fetcher and the config store client.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use wdsync_core::{CanonicalRecord, Identifier, IncomingSet, KnownSnapshot, SourceRecord, UpsertOutcome};

pub const CRATE_NAME: &str = "wdsync-storage";

/// Registry entry naming the config store itself.
pub const CONFIG_SERVICE: &str = "config";
pub const SERVICE_REGISTRY_CONFIG: &str = "rest_services";

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// `None` keeps the reqwest default.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

pub fn build_client(config: &HttpClientConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().gzip(true).brotli(true);
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    builder.build().context("building reqwest client")
}

/// Ensure a base URL ends with exactly one `/` so endpoints can be appended.
pub fn normalize_base_url(url: &str) -> String {
    format!("{}/", url.trim().trim_end_matches('/'))
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    bearer_token: Option<&str>,
) -> Result<T, FetchError> {
    let mut request = client.get(url);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }

    let resp = request
        .send()
        .instrument(info_span!("http_fetch", url))
        .await
        .map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = resp.status();
    if status != StatusCode::OK {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = resp.bytes().await.map_err(|source| FetchError::Request {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    pub url: String,
}

/// Named service base URLs published by the config store under `rest_services`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceRegistry {
    #[serde(rename = "config")]
    services: BTreeMap<String, ServiceEntry>,
}

impl ServiceRegistry {
    pub async fn fetch(client: &reqwest::Client, config_url: &str) -> Result<Self, FetchError> {
        let url = format!("{}config/{SERVICE_REGISTRY_CONFIG}", normalize_base_url(config_url));
        get_json(client, &url, None).await
    }

    pub fn url_for(&self, service: &str) -> Option<String> {
        self.services
            .get(service)
            .map(|entry| normalize_base_url(&entry.url))
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

/// Row endpoints answer either with a bare array or with `{"data": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourcePayload {
    Rows(Vec<SourceRecord>),
    Wrapped { data: Vec<SourceRecord> },
}

impl SourcePayload {
    fn into_rows(self) -> Vec<SourceRecord> {
        match self {
            Self::Rows(rows) | Self::Wrapped { data: rows } => rows,
        }
    }
}

/// Anything that can list source rows for a services API endpoint.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_records(&self, endpoint: &str) -> Result<Vec<SourceRecord>, FetchError>;
}

/// Authenticated reader for the HR/financial services API.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl SourceFetcher {
    pub fn new(client: reqwest::Client, base_url: &str, bearer_token: Option<String>) -> Self {
        Self {
            client,
            base_url: normalize_base_url(base_url),
            bearer_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RecordSource for SourceFetcher {
    async fn fetch_records(&self, endpoint: &str) -> Result<Vec<SourceRecord>, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint.trim_start_matches('/'));
        let payload: SourcePayload = get_json(&self.client, &url, self.bearer_token.as_deref()).await?;
        Ok(payload.into_rows())
    }
}

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("posting to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("config store rejected write ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unreadable config store response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("cannot build write url from {base}: {reason}")]
    InvalidUrl { base: String, reason: String },
}

impl UpsertError {
    /// Rejections are logged and skipped; anything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// One `importjson` write: a single record keyed by identifier, or a whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertRequest {
    pub config_name: String,
    pub identifier: Option<Identifier>,
    /// JSON text sent as the `config` form field.
    pub payload: String,
    pub definition: Option<String>,
}

impl UpsertRequest {
    pub fn record(
        config_name: &str,
        identifier: &Identifier,
        record: &CanonicalRecord,
        definition: Option<&str>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            config_name: config_name.to_string(),
            identifier: Some(identifier.clone()),
            payload: serde_json::to_string(record)?,
            definition: definition.map(str::to_string),
        })
    }

    pub fn bulk(
        config_name: &str,
        incoming: &IncomingSet,
        definition: Option<&str>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            config_name: config_name.to_string(),
            identifier: None,
            payload: serde_json::to_string(incoming)?,
            definition: definition.map(str::to_string),
        })
    }

    pub fn endpoint(&self) -> String {
        match &self.identifier {
            Some(id) => format!("importjson/{}/{}", self.config_name, id),
            None => format!("importjson/{}", self.config_name),
        }
    }

    /// Absolute write URL under `base_url`. Each path segment is percent-encoded,
    /// so reserved characters in an identifier stay inside its own segment.
    pub fn url(&self, base_url: &str) -> Result<reqwest::Url, UpsertError> {
        let invalid = |reason: String| UpsertError::InvalidUrl {
            base: base_url.to_string(),
            reason,
        };
        let mut url = reqwest::Url::parse(base_url).map_err(|err| invalid(err.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| invalid("not a hierarchical url".to_string()))?;
            segments
                .pop_if_empty()
                .push("importjson")
                .push(&self.config_name);
            if let Some(id) = &self.identifier {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RestEnvelope {
    #[serde(default)]
    rest: RestBody,
}

#[derive(Debug, Default, Deserialize)]
struct RestBody {
    inserted: Option<u64>,
    updated: Option<u64>,
    message: Option<String>,
}

/// Interpret an `importjson` response.
pub fn parse_upsert_response(status: u16, body: &str) -> Result<UpsertOutcome, UpsertError> {
    if status != StatusCode::OK.as_u16() {
        let message = serde_json::from_str::<RestEnvelope>(body)
            .ok()
            .and_then(|env| env.rest.message)
            .unwrap_or_else(|| body.trim().to_string());
        return Err(UpsertError::Rejected { status, message });
    }

    let envelope: RestEnvelope = serde_json::from_str(body).map_err(UpsertError::Decode)?;
    Ok(match (envelope.rest.inserted, envelope.rest.updated) {
        (Some(n), _) => UpsertOutcome::inserted(n),
        (None, Some(n)) => UpsertOutcome::updated(n),
        (None, None) => UpsertOutcome::default(),
    })
}

/// Read/write access to named configurations.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn fetch_snapshot(&self, config_name: &str) -> Result<KnownSnapshot, FetchError>;

    async fn upsert(&self, request: &UpsertRequest) -> Result<UpsertOutcome, UpsertError>;
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    #[serde(default)]
    config: KnownSnapshot,
}

#[derive(Debug, Clone)]
pub struct ConfigStoreClient {
    client: reqwest::Client,
    base_url: String,
}

impl ConfigStoreClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: normalize_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ConfigStore for ConfigStoreClient {
    async fn fetch_snapshot(&self, config_name: &str) -> Result<KnownSnapshot, FetchError> {
        let url = format!("{}config/{}", self.base_url, config_name);
        let envelope: SnapshotEnvelope = get_json(&self.client, &url, None).await?;
        Ok(envelope.config)
    }

    async fn upsert(&self, request: &UpsertRequest) -> Result<UpsertOutcome, UpsertError> {
        let url = request.url(&self.base_url)?;
        let mut form = vec![("config", request.payload.as_str())];
        if let Some(definition) = &request.definition {
            form.push(("definition", definition.as_str()));
        }

        debug!(%url, bytes = request.payload.len(), "posting config change");
        let transport = |source| UpsertError::Transport {
            url: url.to_string(),
            source,
        };
        let resp = self
            .client
            .post(url.clone())
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport)?;
        parse_upsert_response(status, &body)
    }
}

/// Both collaborators, resolved through the `rest_services` registry.
#[derive(Debug, Clone)]
pub struct Services {
    pub source: SourceFetcher,
    pub store: ConfigStoreClient,
}

impl Services {
    /// Read the service registry from the bootstrap config URL and wire up both clients.
    ///
    /// The store keeps the bootstrap URL when the registry has no `config` entry;
    /// a missing source service is an error.
    pub async fn discover(
        http: &HttpClientConfig,
        config_url: &str,
        services_name: &str,
        bearer_token: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = build_client(http)?;
        let registry = ServiceRegistry::fetch(&client, config_url)
            .await
            .context("reading service registry")?;
        let source_url = registry.url_for(services_name).with_context(|| {
            format!(
                "service {services_name} is not in the registry (known: {})",
                registry.service_names().collect::<Vec<_>>().join(", ")
            )
        })?;
        let store_url = registry
            .url_for(CONFIG_SERVICE)
            .unwrap_or_else(|| normalize_base_url(config_url));
        debug!(%source_url, %store_url, "resolved services");

        Ok(Self {
            source: SourceFetcher::new(client.clone(), &source_url, bearer_token),
            store: ConfigStoreClient::new(client, &store_url),
        })
    }
}
