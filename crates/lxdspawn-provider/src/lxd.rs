//! LXD provider implementation using the REST API over HTTPS

use crate::{
    ContainerName, ContainerProvider, ContainerStatus, CreateContainerConfig, ExecConfig,
    ExecResult, InstanceInfo, InstanceState, NetworkInterface, ProviderError, PushFileConfig,
    Result,
};
use async_trait::async_trait;
use lxdspawn_config::LxdConfig;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

const API_VERSION: &str = "1.0";

/// LXD operation status codes
const OPERATION_SUCCESS: u16 = 200;
const OPERATION_RUNNING: u16 = 103;
const OPERATION_PENDING: u16 = 105;

/// LXD provider talking to the `/1.0` REST API
pub struct LxdProvider {
    client: reqwest::Client,
    endpoint: String,
    operation_timeout: u64,
}

/// Standard LXD response envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: u16,
    #[serde(default)]
    operation: String,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    status_code: u16,
    #[serde(default)]
    err: String,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireInstance {
    name: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct WireState {
    status: String,
    #[serde(default)]
    network: Option<HashMap<String, NetworkInterface>>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecMetadata {
    #[serde(rename = "return", default)]
    return_code: i64,
    #[serde(default)]
    output: HashMap<String, String>,
}

impl LxdProvider {
    /// Create a new LXD provider and check that the server answers
    pub async fn new(config: &LxdConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls);

        if let Some((cert_path, key_path)) = config.client_identity_paths() {
            let mut pem = std::fs::read(&cert_path)?;
            pem.push(b'\n');
            pem.extend(std::fs::read(&key_path)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ProviderError::ConfigError(format!("bad client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        let provider = Self::with_client(client, &config.endpoint, config.operation_timeout_secs);
        provider.ping().await?;
        Ok(provider)
    }

    /// Wrap an existing HTTP client without probing the server
    pub fn with_client(client: reqwest::Client, endpoint: &str, operation_timeout: u64) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            operation_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn instance_path(name: &ContainerName) -> String {
        format!("/{}/instances/{}", API_VERSION, name)
    }

    /// Send a request and decode the LXD envelope, turning error envelopes into errors
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Envelope> {
        let response = request.send().await?;
        let http_status = response.status();
        let body = response.bytes().await?;

        let envelope: Envelope = serde_json::from_slice(&body).map_err(|e| {
            ProviderError::InvalidResponse(format!("HTTP {}: {}", http_status, e))
        })?;

        if envelope.kind == "error" || http_status.is_client_error() || http_status.is_server_error()
        {
            let code = if envelope.error_code != 0 {
                envelope.error_code
            } else {
                http_status.as_u16()
            };
            return Err(ProviderError::Api {
                code,
                message: envelope.error,
            });
        }

        Ok(envelope)
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Envelope> {
        tracing::debug!("LXD {} {}", method, path);
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(request).await
    }

    /// Wait for a background operation to finish and return its metadata
    async fn wait_operation(&self, envelope: Envelope) -> Result<Option<Value>> {
        if envelope.kind != "async" {
            return Ok(Some(envelope.metadata));
        }
        if envelope.operation.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "async response without operation".to_string(),
            ));
        }

        let request = self
            .client
            .get(self.url(&format!("{}/wait", envelope.operation)))
            .query(&[("timeout", self.operation_timeout.to_string())])
            // the server holds the request open for up to operation_timeout
            .timeout(Duration::from_secs(self.operation_timeout + 10));
        let waited = self.send(request).await?;
        let operation: Operation = serde_json::from_value(waited.metadata)?;

        match operation.status_code {
            OPERATION_SUCCESS => Ok(operation.metadata),
            OPERATION_RUNNING | OPERATION_PENDING => {
                tracing::warn!("LXD operation {} still {}", operation.id, operation.status);
                Err(ProviderError::Timeout)
            }
            _ => Err(ProviderError::OperationFailed(if operation.err.is_empty() {
                operation.status
            } else {
                operation.err
            })),
        }
    }

    async fn change_state(&self, name: &ContainerName, body: Value) -> Result<()> {
        let path = format!("{}/state", Self::instance_path(name));
        let envelope = self
            .request(Method::PUT, &path, Some(body))
            .await
            .map_err(|e| not_found_as(e, || ProviderError::ContainerNotFound(name.to_string())))?;
        self.wait_operation(envelope).await?;
        Ok(())
    }

    /// Fetch a recorded exec output log as text
    async fn fetch_log(&self, path: &str) -> Result<String> {
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::ExecError(format!(
                "failed to fetch exec output {}: HTTP {}",
                path,
                response.status()
            )));
        }
        let text = response.text().await?;
        // Logs are only kept for the caller; leftover files are harmless
        if let Err(e) = self.client.delete(self.url(path)).send().await {
            tracing::debug!("Failed to delete exec log {}: {}", path, e);
        }
        Ok(text)
    }
}

fn not_found_as(err: ProviderError, f: impl FnOnce() -> ProviderError) -> ProviderError {
    if err.is_not_found() {
        f()
    } else {
        err
    }
}

fn to_instance_info(wire: WireInstance) -> InstanceInfo {
    InstanceInfo {
        name: ContainerName::new(wire.name),
        status: ContainerStatus::from(wire.status.as_str()),
    }
}

fn create_body(config: &CreateContainerConfig) -> Value {
    let mut source = json!({
        "type": "image",
        "alias": config.source.alias,
    });
    if let Some(server) = &config.source.server {
        source["server"] = json!(server);
        source["mode"] = json!("pull");
        source["protocol"] = json!(config.source.protocol.as_deref().unwrap_or("simplestreams"));
    }

    let mut body = json!({
        "name": config.name,
        "config": config.config,
        "source": source,
    });
    // An explicit empty list would strip the default profile (and its NIC/disk)
    if !config.profiles.is_empty() {
        body["profiles"] = json!(config.profiles);
    }
    body
}

#[async_trait]
impl ContainerProvider for LxdProvider {
    async fn get(&self, name: &ContainerName) -> Result<Option<InstanceInfo>> {
        match self.request(Method::GET, &Self::instance_path(name), None).await {
            Ok(envelope) => {
                let wire: WireInstance = serde_json::from_value(envelope.metadata)?;
                Ok(Some(to_instance_info(wire)))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<InstanceInfo> {
        let path = format!("/{}/instances", API_VERSION);
        let envelope = self
            .request(Method::POST, &path, Some(create_body(config)))
            .await?;
        self.wait_operation(envelope).await?;

        let name = ContainerName::new(config.name.clone());
        self.get(&name)
            .await?
            .ok_or_else(|| ProviderError::ContainerNotFound(config.name.clone()))
    }

    async fn start(&self, name: &ContainerName) -> Result<()> {
        self.change_state(name, json!({ "action": "start", "timeout": -1 }))
            .await
    }

    async fn stop(&self, name: &ContainerName, timeout: Option<u32>) -> Result<()> {
        self.change_state(
            name,
            json!({
                "action": "stop",
                "timeout": timeout.map(i64::from).unwrap_or(30),
                "force": false,
            }),
        )
        .await
    }

    async fn delete(&self, name: &ContainerName) -> Result<()> {
        let envelope = self
            .request(Method::DELETE, &Self::instance_path(name), None)
            .await
            .map_err(|e| not_found_as(e, || ProviderError::ContainerNotFound(name.to_string())))?;
        self.wait_operation(envelope).await?;
        Ok(())
    }

    async fn state(&self, name: &ContainerName) -> Result<InstanceState> {
        let path = format!("{}/state", Self::instance_path(name));
        let envelope = self
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| not_found_as(e, || ProviderError::ContainerNotFound(name.to_string())))?;
        let wire: WireState = serde_json::from_value(envelope.metadata)?;
        Ok(InstanceState {
            status: ContainerStatus::from(wire.status.as_str()),
            network: wire.network.unwrap_or_default(),
        })
    }

    async fn push_file(&self, name: &ContainerName, file: &PushFileConfig) -> Result<()> {
        let path = format!("{}/files", Self::instance_path(name));
        tracing::debug!("LXD POST {} path={}", path, file.path);
        let request = self
            .client
            .post(self.url(&path))
            .query(&[("path", file.path.as_str())])
            .header("X-LXD-type", "file")
            .header("X-LXD-write", "overwrite")
            .header("X-LXD-uid", file.uid.to_string())
            .header("X-LXD-gid", file.gid.to_string())
            .header("X-LXD-mode", format!("{:04o}", file.mode))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(file.contents.clone());
        self.send(request)
            .await
            .map_err(|e| not_found_as(e, || ProviderError::ContainerNotFound(name.to_string())))?;
        Ok(())
    }

    async fn exec(&self, name: &ContainerName, config: &ExecConfig) -> Result<ExecResult> {
        if config.cmd.is_empty() {
            return Err(ProviderError::ExecError("empty command".to_string()));
        }

        let body = json!({
            "command": config.cmd,
            "wait-for-websocket": false,
            "interactive": false,
            "record-output": true,
        });

        let path = format!("{}/exec", Self::instance_path(name));
        let envelope = self
            .request(Method::POST, &path, Some(body))
            .await
            .map_err(|e| not_found_as(e, || ProviderError::ContainerNotFound(name.to_string())))?;
        let metadata = match self.wait_operation(envelope).await? {
            Some(value) => serde_json::from_value::<ExecMetadata>(value)?,
            None => ExecMetadata::default(),
        };

        let stdout = match metadata.output.get("1") {
            Some(log) => self.fetch_log(log).await?,
            None => String::new(),
        };
        let stderr = match metadata.output.get("2") {
            Some(log) => self.fetch_log(log).await?,
            None => String::new(),
        };

        Ok(ExecResult {
            exit_code: metadata.return_code,
            stdout,
            stderr,
        })
    }

    async fn profile_exists(&self, profile: &str) -> Result<bool> {
        let path = format!("/{}/profiles/{}", API_VERSION, profile);
        match self.request(Method::GET, &path, None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ping(&self) -> Result<()> {
        let envelope = self
            .request(Method::GET, &format!("/{}", API_VERSION), None)
            .await
            .map_err(|e| match e {
                ProviderError::Http(inner) => ProviderError::ConnectionError(inner.to_string()),
                other => other,
            })?;
        if let Some(auth) = envelope.metadata.get("auth").and_then(Value::as_str) {
            if auth != "trusted" {
                tracing::warn!("LXD reports this client as '{}' (not trusted)", auth);
            }
        }
        Ok(())
    }
}
