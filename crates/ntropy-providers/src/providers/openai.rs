//! OpenAI connection: embeddings and chat completions.

use ntropy_vault::{CredentialRecord, SecretField};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Value, json};

use crate::error::{ProviderError, Result};
use crate::http::{self, LazyClient};
use crate::providers::{LiveConnection, require_text, required_secret, setting_or};
use crate::registry::{AuthSchema, Capability, EmbeddingModel, ProviderDescriptor};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, EmbeddingInput, Usage, Vector};

pub const SERVICE: &str = "OpenAI";

/// Default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub const EMBEDDING_MODELS: &[EmbeddingModel] = &[
    EmbeddingModel {
        name: "text-embedding-3-small",
        service: SERVICE,
        description: "OpenAI text-embedding-3-small (1536 dimensions)",
        defaults: r#"{"dimensions":1536}"#,
        settings_help: &[("dimensions", "Output size, at most 1536.")],
        accepts_images: false,
    },
    EmbeddingModel {
        name: "text-embedding-3-large",
        service: SERVICE,
        description: "OpenAI text-embedding-3-large (3072 dimensions)",
        defaults: r#"{"dimensions":3072}"#,
        settings_help: &[("dimensions", "Output size, at most 3072.")],
        accepts_images: false,
    },
    EmbeddingModel {
        name: "text-embedding-ada-002",
        service: SERVICE,
        description: "OpenAI text-embedding-ada-002 (1536 dimensions, fixed)",
        defaults: "{}",
        settings_help: &[],
        accepts_images: false,
    },
];

pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    service_name: SERVICE,
    description: "OpenAI embeddings and chat completions",
    auth_schema: AuthSchema {
        required: &[SecretField::ApiKey],
        optional: &[],
    },
    connect,
    capabilities: &[Capability::Embeddings, Capability::Chat],
    embedding_models: EMBEDDING_MODELS,
};

pub fn connect(record: &CredentialRecord) -> Result<LiveConnection> {
    OpenAiConnection::from_record(record).map(LiveConnection::OpenAi)
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

pub struct OpenAiConnection {
    api_key: String,
    base_url: url::Url,
    organization: Option<String>,
    other_setting: Option<Value>,
    client: LazyClient,
}

impl std::fmt::Debug for OpenAiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConnection")
            .field("base_url", &self.base_url.as_str())
            .field("organization", &self.organization)
            .field("initialized", &self.client.is_initialized())
            .finish_non_exhaustive()
    }
}

impl OpenAiConnection {
    pub fn from_record(record: &CredentialRecord) -> Result<Self> {
        Ok(Self {
            api_key: required_secret(SERVICE, record, SecretField::ApiKey)?,
            base_url: http::parse_base_url(&setting_or(record, "base_url", DEFAULT_BASE_URL))?,
            organization: record.setting_str("organization").map(str::to_owned),
            other_setting: record.other_setting.clone(),
            client: LazyClient::new(SERVICE),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
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

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = http::endpoint(&self.base_url, path);
        tracing::debug!(url = %url, model = %body["model"], provider = SERVICE, "sending request");

        let mut request = self
            .client
            .get()?
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        http::send_json(SERVICE, request).await
    }

    pub async fn embeddings(
        &self,
        model: &str,
        input: EmbeddingInput,
        settings: Option<&Value>,
    ) -> Result<Vector> {
        let body = embedding_body(model, require_text(model, &input)?, settings)?;
        let response = self.post("embeddings", &body).await?;
        let embedding = http::parse_embedding(SERVICE, &response["data"][0]["embedding"])?;
        Ok(input.into_vector(embedding, model, settings))
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = chat_body(request)?;
        let response = self.post("chat/completions", &body).await?;
        parse_chat_response(&response)
    }
}

// ---------------------------------------------------------------------------
// Wire format (free functions)
// ---------------------------------------------------------------------------

/// Build a `/v1/embeddings` request body.
pub fn embedding_body(model: &str, text: &str, settings: Option<&Value>) -> Result<Value> {
    let entry = EMBEDDING_MODELS
        .iter()
        .find(|m| m.name == model)
        .ok_or_else(|| ProviderError::ModelNotFound {
            model: model.to_owned(),
        })?;

    let mut body = json!({ "model": model, "input": text });

    if let Some(dims) = settings.and_then(|s| s.get("dimensions")).filter(|v| !v.is_null()) {
        let max = entry.default_settings()["dimensions"].as_u64();
        match (dims.as_u64(), max) {
            (Some(n), Some(max)) if n > 0 && n <= max => body["dimensions"] = json!(n),
            _ => {
                return Err(ProviderError::InvalidInput {
                    reason: format!("model {model} does not accept dimensions {dims}"),
                });
            }
        }
    }

    Ok(body)
}

/// Convert chat messages to the OpenAI content-part format.
///
/// Images must be `http(s)` URLs.
pub fn messages_to_openai(messages: &[ChatMessage]) -> Result<Vec<Value>> {
    messages
        .iter()
        .map(|msg| {
            let mut content = vec![json!({ "type": "text", "text": msg.content })];
            for image in &msg.images {
                if !http::is_remote(image) {
                    return Err(ProviderError::InvalidInput {
                        reason: format!("image must be a URL for OpenAI: {image}"),
                    });
                }
                content.push(json!({ "type": "image_url", "image_url": { "url": image } }));
            }
            Ok(json!({ "role": msg.role.as_str(), "content": content }))
        })
        .collect()
}

/// Build a `/v1/chat/completions` request body.
pub fn chat_body(request: &ChatRequest) -> Result<Value> {
    let mut body = json!({
        "model": request.model,
        "messages": messages_to_openai(&request.messages)?,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }
    Ok(body)
}

/// Parse a non-streaming chat completion.
pub fn parse_chat_response(v: &Value) -> Result<ChatResponse> {
    let message = &v["choices"][0]["message"];
    let content = message["content"]
        .as_str()
        .ok_or_else(|| ProviderError::ResponseParse {
            service: SERVICE.to_owned(),
            reason: "missing `choices[0].message.content` in response".into(),
        })?;

    let usage = v.get("usage").map(|u| Usage {
        input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
    });

    Ok(ChatResponse {
        model: v["model"].as_str().unwrap_or_default().to_owned(),
        content: content.to_owned(),
        usage,
    })
}
