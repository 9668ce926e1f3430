//! Kubernetes API access over HTTPS.
//!
//! Supports the two ways an agent is usually configured: in-cluster (service
//! account token and CA mounted into the pod) and a kubeconfig file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::kubernetes::{ClusterApi, ObjectMeta, Pod, PodSelector};
use super::{ProviderConfig, ProviderError};
use crate::leader::{LeaseLock, LeaseRecord};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Upper bound for one API call, kept below the election renew deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Namespace used when neither the flags nor the cluster settings name one.
const FALLBACK_NAMESPACE: &str = "default";

/// Connection settings resolved from in-cluster files or a kubeconfig.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSettings {
    pub server: String,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
    pub token: Option<String>,
    /// Re-read on every request, service account tokens rotate.
    pub token_file: Option<PathBuf>,
    /// Client certificate followed by its private key, PEM encoded.
    pub identity_pem: Option<Vec<u8>>,
    pub namespace: Option<String>,
}

impl ClusterSettings {
    pub fn in_cluster() -> Result<Self, ProviderError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ProviderError::Config("not running in a cluster: KUBERNETES_SERVICE_HOST is unset".into())
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let server = if host.contains(':') {
            format!("https://[{host}]:{port}")
        } else {
            format!("https://{host}:{port}")
        };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        Ok(Self {
            server,
            ca_pem: Some(std::fs::read(dir.join("ca.crt"))?),
            token_file: Some(dir.join("token")),
            namespace: std::fs::read_to_string(dir.join("namespace"))
                .ok()
                .map(|ns| ns.trim().to_string()),
            ..Default::default()
        })
    }

    pub fn from_kubeconfig(path: &Path) -> Result<Self, ProviderError> {
        let content = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Kubeconfig::parse(&content)?.resolve(base)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: String,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    #[serde(default)]
    server: String,
    certificate_authority: Option<PathBuf>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,
    client_certificate: Option<PathBuf>,
    client_certificate_data: Option<String>,
    client_key: Option<PathBuf>,
    client_key_data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: String,
    namespace: Option<String>,
}

impl Kubeconfig {
    fn parse(content: &str) -> Result<Self, ProviderError> {
        serde_yaml::from_str(content)
            .map_err(|e| ProviderError::Decode(format!("invalid kubeconfig: {e}")))
    }

    /// Settings of the current context; relative paths resolve against `base`.
    fn resolve(self, base: &Path) -> Result<ClusterSettings, ProviderError> {
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == self.current_context)
            .or_else(|| self.contexts.first())
            .ok_or_else(|| ProviderError::Config("kubeconfig has no contexts".into()))?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| {
                ProviderError::Config(format!(
                    "kubeconfig context '{}' references unknown cluster '{}'",
                    context.name, context.context.cluster
                ))
            })?;
        let user = self.users.iter().find(|u| u.name == context.context.user);

        let entry = &cluster.cluster;
        let ca_pem = match (&entry.certificate_authority_data, &entry.certificate_authority) {
            (Some(data), _) => Some(decode_data("certificate-authority-data", data)?),
            (None, Some(path)) => Some(std::fs::read(base.join(path))?),
            (None, None) => None,
        };

        let mut settings = ClusterSettings {
            server: entry.server.trim_end_matches('/').to_string(),
            ca_pem,
            insecure_skip_tls_verify: entry.insecure_skip_tls_verify,
            namespace: context.context.namespace.clone(),
            ..Default::default()
        };

        if let Some(user) = user.map(|u| &u.user) {
            settings.token = user.token.clone();
            settings.token_file = user.token_file.as_ref().map(|p| base.join(p));

            let cert = match (&user.client_certificate_data, &user.client_certificate) {
                (Some(data), _) => Some(decode_data("client-certificate-data", data)?),
                (None, Some(path)) => Some(std::fs::read(base.join(path))?),
                (None, None) => None,
            };
            let key = match (&user.client_key_data, &user.client_key) {
                (Some(data), _) => Some(decode_data("client-key-data", data)?),
                (None, Some(path)) => Some(std::fs::read(base.join(path))?),
                (None, None) => None,
            };
            if let (Some(mut cert), Some(key)) = (cert, key) {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                settings.identity_pem = Some(cert);
            }
        }

        if settings.server.is_empty() {
            return Err(ProviderError::Config(format!(
                "kubeconfig cluster '{}' has no server",
                cluster.name
            )));
        }
        Ok(settings)
    }
}

fn decode_data(field: &str, data: &str) -> Result<Vec<u8>, ProviderError> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ProviderError::Decode(format!("{field}: {e}")))
}

#[derive(Debug, Clone)]
enum Credentials {
    Anonymous,
    Token(String),
    TokenFile(PathBuf),
}

/// Kubernetes API client covering the calls the agent makes.
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    server: String,
    credentials: Credentials,
    namespace: Option<String>,
}

impl KubeClient {
    /// Kubeconfig when configured, in-cluster settings otherwise.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let settings = match &config.kube_config {
            Some(path) => ClusterSettings::from_kubeconfig(path)?,
            None => ClusterSettings::in_cluster()?,
        };
        Self::new(settings)
    }

    pub fn new(settings: ClusterSettings) -> Result<Self, ProviderError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(ca) = &settings.ca_pem {
            for cert in reqwest::Certificate::from_pem_bundle(ca)? {
                builder = builder.add_root_certificate(cert);
            }
        }
        if let Some(identity) = &settings.identity_pem {
            builder = builder.identity(reqwest::Identity::from_pem(identity)?);
        }
        if settings.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let credentials = match (settings.token, settings.token_file) {
            (Some(token), _) => Credentials::Token(token),
            (None, Some(path)) => Credentials::TokenFile(path),
            (None, None) => Credentials::Anonymous,
        };

        Ok(Self {
            http: builder.build()?,
            server: settings.server,
            credentials,
            namespace: settings.namespace,
        })
    }

    /// `configured` when set, else the service account or kubeconfig
    /// context namespace, else `default`.
    pub fn resolve_namespace(&self, configured: &str) -> String {
        if !configured.is_empty() {
            return configured.to_string();
        }
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(FALLBACK_NAMESPACE)
            .to_string()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        let request = self
            .http
            .request(method, format!("{}{}", self.server, path))
            .header(ACCEPT, "application/json");
        Ok(match &self.credentials {
            Credentials::Anonymous => request,
            Credentials::Token(token) => request.bearer_auth(token),
            Credentials::TokenFile(path) => {
                request.bearer_auth(std::fs::read_to_string(path)?.trim())
            }
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: api_message(&body),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Message of a `Status` error body, or the raw body.
fn api_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Status {
        message: String,
    }
    match serde_json::from_slice::<Status>(body) {
        Ok(status) => status.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    }
}

#[derive(Deserialize)]
struct Namespace {
    metadata: ObjectMeta,
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn namespace_uid(&self, name: &str) -> Result<String, ProviderError> {
        let request = self.request(Method::GET, &format!("/api/v1/namespaces/{name}"))?;
        let namespace: Namespace = self.send(request).await?;
        Ok(namespace.metadata.uid)
    }

    async fn list_pods(&self, selector: &PodSelector) -> Result<Vec<Pod>, ProviderError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(field) = &selector.field {
            query.push(("fieldSelector", field.as_str()));
        }
        if let Some(label) = &selector.label {
            query.push(("labelSelector", label.as_str()));
        }
        let request = self.request(Method::GET, "/api/v1/pods")?.query(&query);
        let pods: PodList = self.send(request).await?;
        debug!(count = pods.items.len(), ?selector, "pods listed");
        Ok(pods.items)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseObject {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: LeaseSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    holder_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease_duration_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    acquire_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renew_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease_transitions: Option<i32>,
}

impl LeaseObject {
    fn from_record(namespace: &str, name: &str, record: &LeaseRecord) -> Self {
        Self {
            api_version: "coordination.k8s.io/v1".into(),
            kind: "Lease".into(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                resource_version: record.resource_version.clone(),
                ..Default::default()
            },
            spec: LeaseSpec {
                holder_identity: Some(record.holder_identity.clone()),
                lease_duration_seconds: Some(record.lease_duration.as_secs() as i64),
                acquire_time: record.acquire_time.map(micro_time),
                renew_time: record.renew_time.map(micro_time),
                lease_transitions: Some(record.transitions),
            },
        }
    }

    fn into_record(self) -> LeaseRecord {
        LeaseRecord {
            holder_identity: self.spec.holder_identity.unwrap_or_default(),
            lease_duration: std::time::Duration::from_secs(
                self.spec.lease_duration_seconds.unwrap_or(0).max(0) as u64,
            ),
            acquire_time: self.spec.acquire_time.as_deref().and_then(parse_time),
            renew_time: self.spec.renew_time.as_deref().and_then(parse_time),
            transitions: self.spec.lease_transitions.unwrap_or(0),
            resource_version: self.metadata.resource_version,
        }
    }
}

fn micro_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// `coordination.k8s.io/v1` Lease used as the election lock.
#[derive(Debug, Clone)]
pub struct KubeLease {
    client: KubeClient,
    namespace: String,
    name: String,
}

impl KubeLease {
    pub fn new(client: KubeClient, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn collection(&self) -> String {
        format!(
            "/apis/coordination.k8s.io/v1/namespaces/{}/leases",
            self.namespace
        )
    }

    fn path(&self) -> String {
        format!("{}/{}", self.collection(), self.name)
    }
}

#[async_trait]
impl LeaseLock for KubeLease {
    async fn get(&self) -> Result<Option<LeaseRecord>, ProviderError> {
        let request = self.client.request(Method::GET, &self.path())?;
        match self.client.send::<LeaseObject>(request).await {
            Ok(lease) => Ok(Some(lease.into_record())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, record: &LeaseRecord) -> Result<LeaseRecord, ProviderError> {
        let body = LeaseObject::from_record(&self.namespace, &self.name, record);
        let request = self.client.request(Method::POST, &self.collection())?.json(&body);
        let created: LeaseObject = self.client.send(request).await?;
        Ok(created.into_record())
    }

    async fn update(&self, record: &LeaseRecord) -> Result<LeaseRecord, ProviderError> {
        let body = LeaseObject::from_record(&self.namespace, &self.name, record);
        let request = self.client.request(Method::PUT, &self.path())?.json(&body);
        let updated: LeaseObject = self.client.send(request).await?;
        Ok(updated.into_record())
    }

    fn describe(&self) -> String {
        format!("leases/{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: edge
clusters:
  - name: other
    cluster:
      server: https://10.0.0.1:6443
  - name: edge-cluster
    cluster:
      server: https://192.168.1.10:6443/
      certificate-authority: ca.crt
contexts:
  - name: admin
    context:
      cluster: other
      user: admin
  - name: edge
    context:
      cluster: edge-cluster
      user: edge-user
      namespace: telemetruum
users:
  - name: edge-user
    user:
      client-certificate-data: Y2VydA==
      client-key-data: a2V5
"#;

    #[test]
    fn test_kubeconfig_current_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ca.crt"), "ca-pem").unwrap();

        let settings = Kubeconfig::parse(KUBECONFIG).unwrap().resolve(dir.path()).unwrap();

        assert_eq!(settings.server, "https://192.168.1.10:6443");
        assert_eq!(settings.ca_pem.as_deref(), Some(b"ca-pem".as_slice()));
        assert_eq!(settings.identity_pem.as_deref(), Some(b"cert\nkey".as_slice()));
        assert_eq!(settings.namespace.as_deref(), Some("telemetruum"));
        assert!(settings.token.is_none());
    }

    #[test]
    fn test_kubeconfig_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "current-context: c\nclusters:\n- name: k\n  cluster:\n    server: https://k:6443\n    insecure-skip-tls-verify: true\ncontexts:\n- name: c\n  context:\n    cluster: k\n    user: u\nusers:\n- name: u\n  user:\n    token: s3cr3t\n",
        )
        .unwrap();

        let settings = ClusterSettings::from_kubeconfig(&path).unwrap();

        assert_eq!(settings.server, "https://k:6443");
        assert!(settings.insecure_skip_tls_verify);
        assert_eq!(settings.token.as_deref(), Some("s3cr3t"));
        assert!(settings.ca_pem.is_none());
    }

    #[test]
    fn test_lease_namespace_resolution() {
        let client = |namespace: Option<&str>| {
            KubeClient::new(ClusterSettings {
                server: "http://127.0.0.1:6443".into(),
                namespace: namespace.map(str::to_string),
                ..Default::default()
            })
            .unwrap()
        };

        assert_eq!(client(Some("edge")).resolve_namespace("telemetruum"), "telemetruum");
        assert_eq!(client(Some("edge")).resolve_namespace(""), "edge");
        assert_eq!(client(Some("")).resolve_namespace(""), "default");
        assert_eq!(client(None).resolve_namespace(""), "default");
    }

    #[test]
    fn test_kubeconfig_errors() {
        let no_contexts = Kubeconfig::parse("clusters: []\n").unwrap();
        assert!(matches!(
            no_contexts.resolve(Path::new(".")),
            Err(ProviderError::Config(_))
        ));

        let dangling = Kubeconfig::parse(
            "current-context: c\ncontexts:\n- name: c\n  context:\n    cluster: missing\n",
        )
        .unwrap();
        assert!(matches!(
            dangling.resolve(Path::new(".")),
            Err(ProviderError::Config(_))
        ));

        assert!(matches!(
            Kubeconfig::parse("clusters: {"),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn test_lease_object_conversion() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = LeaseRecord {
            holder_identity: "agent-a".into(),
            lease_duration: Duration::from_secs(60),
            acquire_time: Some(now),
            renew_time: Some(now),
            transitions: 2,
            resource_version: Some("812".into()),
        };

        let object = LeaseObject::from_record("telemetruum", "lock", &record);
        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["apiVersion"], "coordination.k8s.io/v1");
        assert_eq!(json["metadata"]["resourceVersion"], "812");
        assert_eq!(json["spec"]["holderIdentity"], "agent-a");
        assert_eq!(json["spec"]["leaseDurationSeconds"], 60);
        assert_eq!(json["spec"]["renewTime"], "2024-05-01T10:00:00.123456Z");

        assert_eq!(object.into_record(), record);
    }

    #[test]
    fn test_api_message() {
        assert_eq!(
            api_message(br#"{"kind":"Status","message":"leases \"lock\" not found","code":404}"#),
            "leases \"lock\" not found"
        );
        assert_eq!(api_message(b"Unauthorized\n"), "Unauthorized");
    }

    /// Answers each connection with the next canned `(status, body)` and
    /// records request heads.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut heads = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                heads.push(read_request(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            heads
        });
        (addr, handle)
    }

    /// Reads one request, head and `Content-Length` body.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if n == 0 || buf.len() >= end + 4 + length {
                    return text;
                }
            } else if n == 0 {
                return text;
            }
        }
    }

    fn client(server: String) -> KubeClient {
        KubeClient::new(ClusterSettings {
            server,
            token: Some("t0ken".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_cluster_api_requests() {
        let (server, heads) = serve(vec![
            (200, r#"{"metadata":{"name":"kube-system","uid":"3f1c9a2e"}}"#),
            (
                200,
                r#"{"items":[{"metadata":{"name":"web-0","namespace":"shop"},"spec":{"nodeName":"node-1","containers":[{"name":"web"}]}}]}"#,
            ),
        ])
        .await;
        let client = client(server);

        assert_eq!(client.namespace_uid("kube-system").await.unwrap(), "3f1c9a2e");
        let pods = client.list_pods(&PodSelector::on_node("node-1")).await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].spec.node_name, "node-1");

        let heads = heads.await.unwrap();
        assert!(heads[0].starts_with("GET /api/v1/namespaces/kube-system "));
        assert!(heads[0].to_lowercase().contains("authorization: bearer t0ken"));
        assert!(heads[1].starts_with("GET /api/v1/pods?fieldSelector=spec.nodeName%3Dnode-1 "));
    }

    #[tokio::test]
    async fn test_lease_lock_requests() {
        let (server, heads) = serve(vec![
            (404, r#"{"kind":"Status","message":"leases \"lock\" not found","code":404}"#),
            (
                201,
                r#"{"metadata":{"name":"lock","namespace":"ns","resourceVersion":"1"},"spec":{"holderIdentity":"agent-a","leaseDurationSeconds":60}}"#,
            ),
            (409, r#"{"kind":"Status","message":"the object has been modified","code":409}"#),
        ])
        .await;
        let lease = KubeLease::new(client(server), "ns", "lock");
        let record = LeaseRecord {
            holder_identity: "agent-a".into(),
            lease_duration: Duration::from_secs(60),
            ..Default::default()
        };

        assert_eq!(lease.get().await.unwrap(), None);

        let created = lease.create(&record).await.unwrap();
        assert_eq!(created.resource_version.as_deref(), Some("1"));
        assert_eq!(created.holder_identity, "agent-a");

        let err = lease.update(&created).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 409, .. }));

        let heads = heads.await.unwrap();
        assert!(heads[0].starts_with("GET /apis/coordination.k8s.io/v1/namespaces/ns/leases/lock "));
        assert!(heads[1].starts_with("POST /apis/coordination.k8s.io/v1/namespaces/ns/leases "));
        assert!(heads[2].starts_with("PUT /apis/coordination.k8s.io/v1/namespaces/ns/leases/lock "));
        assert_eq!(lease.describe(), "leases/ns/lock");
    }
}
