//! Pinecone vector store connection.
//!
//! `other_setting.index_name` selects the default index. The data-plane host
//! is taken from `other_setting.index_host` when present, otherwise resolved
//! once from the control plane on first use.

use ntropy_vault::{CredentialRecord, SecretField};
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;

use crate::error::{ProviderError, Result};
use crate::http::{self, LazyClient};
use crate::providers::{LiveConnection, required_secret, setting_or};
use crate::registry::{AuthSchema, Capability, ProviderDescriptor};
use crate::types::{QueryMatch, Vector};

pub const SERVICE: &str = "Pinecone";

pub const DEFAULT_CONTROLLER_URL: &str = "https://api.pinecone.io";

const API_VERSION: &str = "2024-07";

pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    service_name: SERVICE,
    description: "Pinecone serverless vector database",
    auth_schema: AuthSchema {
        required: &[SecretField::ApiKey],
        optional: &[],
    },
    connect,
    capabilities: &[Capability::VectorStore],
    embedding_models: &[],
};

pub fn connect(record: &CredentialRecord) -> Result<LiveConnection> {
    PineconeConnection::from_record(record).map(LiveConnection::Pinecone)
}

pub struct PineconeConnection {
    api_key: String,
    index_name: Option<String>,
    controller_url: url::Url,
    host: OnceCell<String>,
    other_setting: Option<Value>,
    client: LazyClient,
}

impl std::fmt::Debug for PineconeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PineconeConnection")
            .field("index_name", &self.index_name)
            .field("host", &self.host.get())
            .field("initialized", &self.client.is_initialized())
            .finish_non_exhaustive()
    }
}

impl PineconeConnection {
    pub fn from_record(record: &CredentialRecord) -> Result<Self> {
        let host = OnceCell::new();
        if let Some(configured) = record.setting_str("index_host").filter(|h| !h.is_empty()) {
            // A fresh cell cannot already be set.
            let _ = host.set(normalize_host(configured));
        }

        Ok(Self {
            api_key: required_secret(SERVICE, record, SecretField::ApiKey)?,
            index_name: record
                .setting_str("index_name")
                .filter(|n| !n.is_empty())
                .map(str::to_owned),
            controller_url: http::parse_base_url(&setting_or(
                record,
                "controller_url",
                DEFAULT_CONTROLLER_URL,
            ))?,
            host,
            other_setting: record.other_setting.clone(),
            client: LazyClient::new(SERVICE),
        })
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }

    pub fn other_setting(&self) -> Option<&Value> {
        self.other_setting.as_ref()
    }

    pub fn init(&self) -> Result<()> {
        self.client.get().map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.client.is_initialized()
    }

    fn request(&self, method: reqwest::Method, url: &str) -> Result<reqwest::RequestBuilder> {
        Ok(self
            .client
            .get()?
            .request(method, url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .header(CONTENT_TYPE, "application/json"))
    }

    /// Data-plane URL of the default index.
    pub async fn index_host(&self) -> Result<&str> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let index = self.index_name.as_deref().ok_or_else(|| ProviderError::Config {
                    reason: "no index name configured for Pinecone (set other_setting.index_name)"
                        .into(),
                })?;

                let url = http::endpoint(&self.controller_url, &format!("indexes/{index}"));
                tracing::debug!(index = index, "resolving Pinecone index host");

                let description =
                    http::send_json(SERVICE, self.request(reqwest::Method::GET, &url)?).await?;
                description["host"]
                    .as_str()
                    .map(normalize_host)
                    .ok_or_else(|| ProviderError::ResponseParse {
                        service: SERVICE.to_owned(),
                        reason: format!("index description for `{index}` has no host"),
                    })
            })
            .await?;
        Ok(host.as_str())
    }

    /// Upsert vectors into the default index. Returns the upserted count.
    pub async fn upsert(&self, vectors: &[Vector], namespace: Option<&str>) -> Result<usize> {
        if vectors.is_empty() {
            return Ok(0);
        }

        let url = format!("{}/vectors/upsert", self.index_host().await?);
        let body = upsert_body(vectors, namespace);
        let response = http::send_json(SERVICE, self.request(reqwest::Method::POST, &url)?.json(&body)).await?;

        let count = response["upsertedCount"].as_u64().unwrap_or(0) as usize;
        tracing::info!(count, namespace = namespace.unwrap_or_default(), "upserted vectors");
        Ok(count)
    }

    /// Nearest-neighbour query against the default index.
    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
        include_values: bool,
    ) -> Result<Vec<QueryMatch>> {
        let url = format!("{}/query", self.index_host().await?);
        let body = query_body(vector, top_k, namespace, include_values);
        let response = http::send_json(SERVICE, self.request(reqwest::Method::POST, &url)?.json(&body)).await?;
        parse_query_response(&response)
    }
}

// ---------------------------------------------------------------------------
// Wire format (free functions)
// ---------------------------------------------------------------------------

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_owned()
    } else {
        format!("https://{host}")
    }
}

/// Pinecone metadata values must be strings, numbers, booleans or lists of
/// strings. Anything else is stored as its JSON text.
fn flatten_metadata_value(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(value.clone()),
        Value::Array(items) if items.iter().all(Value::is_string) => Some(value.clone()),
        other => Some(Value::String(other.to_string())),
    }
}

/// Convert a [`Vector`] to a Pinecone upsert record.
pub fn vector_record(vector: &Vector) -> Value {
    let mut metadata = Map::new();
    for (key, value) in &vector.metadata {
        if let Some(v) = flatten_metadata_value(value) {
            metadata.insert(key.clone(), v);
        }
    }
    if let Some(doc) = &vector.document_id {
        metadata.insert("document_id".into(), json!(doc));
    }
    metadata.insert("data_type".into(), json!(vector.data_type.as_str()));
    metadata.insert("content".into(), json!(vector.content));

    json!({ "id": vector.id, "values": vector.vector, "metadata": metadata })
}

pub fn upsert_body(vectors: &[Vector], namespace: Option<&str>) -> Value {
    let mut body = json!({ "vectors": vectors.iter().map(vector_record).collect::<Vec<_>>() });
    if let Some(ns) = namespace {
        body["namespace"] = json!(ns);
    }
    body
}

pub fn query_body(vector: &[f32], top_k: usize, namespace: Option<&str>, include_values: bool) -> Value {
    let mut body = json!({
        "vector": vector,
        "topK": top_k,
        "includeValues": include_values,
        "includeMetadata": true,
    });
    if let Some(ns) = namespace {
        body["namespace"] = json!(ns);
    }
    body
}

pub fn parse_query_response(v: &Value) -> Result<Vec<QueryMatch>> {
    let matches = v["matches"]
        .as_array()
        .ok_or_else(|| ProviderError::ResponseParse {
            service: SERVICE.to_owned(),
            reason: "missing `matches` array in response".into(),
        })?;

    matches
        .iter()
        .map(|m| {
            serde_json::from_value::<QueryMatch>(m.clone()).map_err(|e| {
                ProviderError::ResponseParse {
                    service: SERVICE.to_owned(),
                    reason: format!("malformed match: {e}"),
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Metadata};

    fn record(settings: Value) -> CredentialRecord {
        CredentialRecord::new(SERVICE)
            .with_api_key("pc-test-key")
            .with_other_setting(settings)
    }

    fn sample_vector() -> Vector {
        let mut metadata = Metadata::new();
        metadata.insert("model".into(), json!("amazon.titan-embed-text-v2:0"));
        metadata.insert("model_settings".into(), json!({ "dimensions": 256 }));
        metadata.insert("missing".into(), Value::Null);
        Vector {
            id: "v1".into(),
            document_id: Some("doc-1".into()),
            vector: vec![0.25, 0.5],
            size: 2,
            data_type: DataType::Text,
            content: "hello".into(),
            metadata,
        }
    }

    #[tokio::test]
    async fn configured_host_skips_control_plane() {
        let conn = PineconeConnection::from_record(&record(json!({
            "index_name": "docs",
            "index_host": "docs-abc123.svc.pinecone.io"
        })))
        .unwrap();
        assert_eq!(conn.index_name(), Some("docs"));
        assert_eq!(
            conn.index_host().await.unwrap(),
            "https://docs-abc123.svc.pinecone.io"
        );
    }

    #[tokio::test]
    async fn missing_index_name_is_config_error() {
        let conn = PineconeConnection::from_record(&record(json!({}))).unwrap();
        assert!(matches!(
            conn.index_host().await,
            Err(ProviderError::Config { .. })
        ));
    }

    #[test]
    fn vector_record_flattens_metadata() {
        let rec = vector_record(&sample_vector());
        assert_eq!(rec["id"], "v1");
        assert_eq!(rec["values"][1], 0.5);
        let md = &rec["metadata"];
        assert_eq!(md["document_id"], "doc-1");
        assert_eq!(md["data_type"], "text");
        assert_eq!(md["content"], "hello");
        assert_eq!(md["model_settings"], r#"{"dimensions":256}"#);
        assert!(md.get("missing").is_none());
    }

    #[test]
    fn upsert_and_query_bodies() {
        let body = upsert_body(&[sample_vector()], Some("ns1"));
        assert_eq!(body["namespace"], "ns1");
        assert_eq!(body["vectors"].as_array().unwrap().len(), 1);

        let body = query_body(&[0.1, 0.2], 5, None, false);
        assert_eq!(body["topK"], 5);
        assert_eq!(body["includeMetadata"], true);
        assert!(body.get("namespace").is_none());
    }

    #[test]
    fn parse_query_matches() {
        let v = json!({
            "matches": [
                { "id": "a", "score": 0.9, "metadata": { "content": "x" } },
                { "id": "b", "score": 0.5, "values": [1.0, 2.0] }
            ]
        });
        let matches = parse_query_response(&v).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].metadata["content"], "x");
        assert_eq!(matches[1].values, vec![1.0, 2.0]);
    }

    #[test]
    fn debug_hides_api_key() {
        let conn = PineconeConnection::from_record(&record(json!({ "index_name": "docs" }))).unwrap();
        assert!(!format!("{conn:?}").contains("pc-test-key"));
    }
}
