//! Kubernetes API client.
//!
//! Talks to the API server with a blocking HTTP client, authenticating with
//! the pod's service-account token and trusting the cluster CA. Backups and
//! deletion requests are `ActionSet`s; retention policies are YAML documents
//! stored under a fixed key in configmaps.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | List backups | `GET /apis/cr.kanister.io/v1alpha1/namespaces/{ns}/actionsets` |
//! | Read a request | `GET .../actionsets/{name}` |
//! | Submit a request | `POST .../actionsets` |
//! | Remove a resource | `DELETE .../actionsets/{name}` |
//! | Load policies | `GET /api/v1/namespaces/{ns}/configmaps` |
//!
//! A 404 becomes [`Error::NotFound`]; every other non-success status is an
//! [`Error::OperationFailed`] carrying the status and response body.

use crate::config::{RetentionConfig, TaweretConfig, ensure_unique_names};
use crate::models::{ActionSet, ActionSetList, BackupRecord, DeletionRequest, DeletionState};
use crate::store::{ConfigProvider, DeletionClient, RecordLister};
use crate::{Error, Result};
use reqwest::blocking::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable holding the in-cluster API host.
pub const SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";

/// Environment variable holding the in-cluster API port.
pub const SERVICE_PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";

const ACTIONSET_GROUP_PATH: &str = "/apis/cr.kanister.io/v1alpha1";
const ACTIONSET_KIND: &str = "actionset";

/// Longest response body quoted in errors.
const MAX_ERROR_BODY: usize = 512;

/// Path of the `ActionSet` collection in `namespace`.
#[must_use]
pub fn actionsets_path(namespace: &str) -> String {
    format!("{ACTIONSET_GROUP_PATH}/namespaces/{namespace}/actionsets")
}

/// Path of one `ActionSet`.
#[must_use]
pub fn actionset_path(namespace: &str, name: &str) -> String {
    format!("{}/{name}", actionsets_path(namespace))
}

/// Path of the configmap collection in `namespace`.
#[must_use]
pub fn configmaps_path(namespace: &str) -> String {
    format!("/api/v1/namespaces/{namespace}/configmaps")
}

/// Works out the API server base URL.
///
/// An explicit server wins. Otherwise the in-cluster service host and port
/// are used, with IPv6 hosts bracketed.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if no server is configured and the
/// in-cluster host is unset.
pub fn resolve_base_url(
    api_server: Option<&str>,
    service_host: Option<&str>,
    service_port: Option<&str>,
) -> Result<String> {
    if let Some(server) = api_server.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(server.trim_end_matches('/').to_string());
    }

    let host = service_host
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "no API server configured and {SERVICE_HOST_ENV} is not set"
            ))
        })?;
    let port = service_port
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("443");

    if host.contains(':') && !host.starts_with('[') {
        Ok(format!("https://[{host}]:{port}"))
    } else {
        Ok(format!("https://{host}:{port}"))
    }
}

/// Maps an HTTP status to a result.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for 404 and [`Error::OperationFailed`] for any
/// other non-2xx status.
pub fn check_status(status: u16, body: &str, operation: &str, kind: &str, name: &str) -> Result<()> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    if status == 404 {
        return Err(Error::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        });
    }

    let mut detail = body.trim().to_string();
    if detail.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !detail.is_char_boundary(end) {
            end -= 1;
        }
        detail.truncate(end);
    }
    Err(Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("HTTP {status}: {detail}"),
    })
}

/// Decodes every scheduled backup in a listing.
///
/// # Errors
///
/// Returns [`Error::Decode`] if a backup is malformed.
pub fn backup_records(list: &ActionSetList) -> Result<Vec<BackupRecord>> {
    let mut records = Vec::with_capacity(list.items.len());
    for item in &list.items {
        if let Some(record) = item.to_backup_record()? {
            records.push(record);
        }
    }
    Ok(records)
}

/// A configmap list response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigMapList {
    /// Listed configmaps.
    #[serde(default)]
    pub items: Vec<ConfigMap>,
}

/// The parts of a configmap taweret reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigMap {
    /// Object metadata.
    #[serde(default)]
    pub metadata: crate::models::actionset::ObjectMeta,
    /// String data.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Parses the retention documents found under `key` in `list`.
///
/// Configmaps without the key, or with an empty document, are skipped.
///
/// # Errors
///
/// Returns [`Error::ConfigParse`] if a document is invalid or two documents
/// name the same schedule.
pub fn retention_configs_from(
    list: &ConfigMapList,
    namespace: &str,
    key: &str,
) -> Result<Vec<RetentionConfig>> {
    let mut configs = Vec::new();
    for configmap in &list.items {
        let name = configmap.metadata.name.as_deref().unwrap_or("<unnamed>");
        let Some(document) = configmap.data.get(key).filter(|d| !d.trim().is_empty()) else {
            debug!(configmap = name, key, "configmap has no retention document");
            continue;
        };
        configs.push(RetentionConfig::from_yaml(
            &format!("{namespace}/{name}"),
            document,
        )?);
    }
    ensure_unique_names(&configs)?;
    Ok(configs)
}

/// Blocking client for the Kubernetes API.
pub struct KubeClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
    config_namespace: String,
    config_key: String,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .field("config_namespace", &self.config_namespace)
            .finish_non_exhaustive()
    }
}

impl KubeClient {
    /// Builds a client from process configuration.
    ///
    /// A missing token file or CA file is tolerated (for example when running
    /// against `kubectl proxy`) and logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the API server cannot be determined, the CA file is
    /// not valid PEM, or the HTTP client cannot be built.
    pub fn from_config(config: &TaweretConfig) -> Result<Self> {
        let cluster = &config.cluster;
        let base_url = resolve_base_url(
            cluster.api_server.as_deref(),
            std::env::var(SERVICE_HOST_ENV).ok().as_deref(),
            std::env::var(SERVICE_PORT_ENV).ok().as_deref(),
        )?;

        let token = match std::fs::read_to_string(&cluster.token_path) {
            Ok(token) => Some(SecretString::from(token.trim().to_string())),
            Err(e) => {
                warn!(
                    path = %cluster.token_path.display(),
                    error = %e,
                    "service-account token unavailable, sending unauthenticated requests"
                );
                None
            },
        };

        let mut builder = Client::builder()
            .user_agent(format!("taweret/{}", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4);
        if cluster.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(cluster.timeout_ms));
        }
        match std::fs::read(&cluster.ca_cert_path) {
            Ok(pem) => {
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    Error::InvalidInput(format!(
                        "invalid cluster CA '{}': {e}",
                        cluster.ca_cert_path.display()
                    ))
                })?;
                builder = builder.add_root_certificate(cert);
            },
            Err(e) => {
                warn!(
                    path = %cluster.ca_cert_path.display(),
                    error = %e,
                    "cluster CA unavailable, using system roots"
                );
            },
        }

        let client = builder.build().map_err(|e| Error::OperationFailed {
            operation: "build_http_client".to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url,
            token,
            config_namespace: config.config_namespace.clone(),
            config_key: config.config_key.clone(),
        })
    }

    /// API server base URL in use.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends a request and returns the response body.
    fn send(&self, request: RequestBuilder, operation: &str, kind: &str, name: &str) -> Result<String> {
        let response = self
            .authorize(request)
            .send()
            .map_err(|e| Error::OperationFailed {
                operation: operation.to_string(),
                cause: format!("HTTP request failed: {e}"),
            })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("cannot read response body: {e}"),
        })?;
        debug!(operation, status, "API request complete");
        check_status(status, &body, operation, kind, name)?;
        Ok(body)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, operation: &str, kind: &str, name: &str) -> Result<T> {
        let body = self.send(self.client.get(self.url(path)), operation, kind, name)?;
        serde_json::from_str(&body).map_err(|e| Error::Decode {
            field: kind.to_string(),
            cause: e.to_string(),
        })
    }
}

impl RecordLister for KubeClient {
    fn list(&self, namespace: &str) -> Result<Vec<BackupRecord>> {
        let list: ActionSetList = self.get_json(
            &actionsets_path(namespace),
            "list_actionsets",
            "actionsets",
            namespace,
        )?;
        backup_records(&list)
    }
}

impl DeletionClient for KubeClient {
    fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let request = self.client.get(self.url(&actionset_path(namespace, name)));
        match self.send(request, "get_actionset", ACTIONSET_KIND, name) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create(&self, request: &DeletionRequest) -> Result<String> {
        let body = serde_json::to_string(&ActionSet::from(request)).map_err(|e| {
            Error::OperationFailed {
                operation: "encode_actionset".to_string(),
                cause: e.to_string(),
            }
        })?;
        let http = self
            .client
            .post(self.url(&actionsets_path(&request.namespace)))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let response = self.send(http, "create_actionset", ACTIONSET_KIND, &request.name)?;

        let created: ActionSet = serde_json::from_str(&response).unwrap_or_else(|e| {
            warn!(
                request = %request.name,
                error = %e,
                "cannot decode created actionset, using the submitted name"
            );
            ActionSet::default()
        });
        Ok(created
            .name()
            .map_or_else(|| request.name.clone(), str::to_string))
    }

    fn get_status(&self, namespace: &str, name: &str) -> Result<DeletionState> {
        let actionset: ActionSet = self.get_json(
            &actionset_path(namespace, name),
            "get_actionset",
            ACTIONSET_KIND,
            name,
        )?;
        Ok(actionset.deletion_state())
    }

    fn delete_resource(&self, namespace: &str, name: &str) -> Result<()> {
        let request = self.client.delete(self.url(&actionset_path(namespace, name)));
        self.send(request, "delete_actionset", ACTIONSET_KIND, name)
            .map(|_| ())
    }
}

impl ConfigProvider for KubeClient {
    fn retention_configs(&self) -> Result<Vec<RetentionConfig>> {
        let list: ConfigMapList = self.get_json(
            &configmaps_path(&self.config_namespace),
            "list_configmaps",
            "configmaps",
            &self.config_namespace,
        )?;
        retention_configs_from(&list, &self.config_namespace, &self.config_key)
    }
}
