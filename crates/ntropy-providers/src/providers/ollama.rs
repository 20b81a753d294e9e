//! Ollama connection: local embeddings, chat and generation.
//!
//! Ollama needs no secrets. An `api_key` is accepted for deployments that sit
//! behind an authenticating proxy and is sent as a bearer token.

use ntropy_vault::{CredentialRecord, SecretField};
use reqwest::header::AUTHORIZATION;
use serde_json::{Value, json};

use crate::error::{ProviderError, Result};
use crate::http::{self, LazyClient};
use crate::providers::{LiveConnection, require_text, setting_or};
use crate::registry::{AuthSchema, Capability, EmbeddingModel, ProviderDescriptor};
use crate::types::{ChatRequest, ChatResponse, EmbeddingInput, GenerateRequest, Usage, Vector};

pub const SERVICE: &str = "Ollama";

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub const EMBEDDING_MODELS: &[EmbeddingModel] = &[
    EmbeddingModel {
        name: "nomic-embed-text",
        service: SERVICE,
        description: "Nomic text embeddings (768 dimensions)",
        defaults: "{}",
        settings_help: &[],
        accepts_images: false,
    },
    EmbeddingModel {
        name: "mxbai-embed-large",
        service: SERVICE,
        description: "mixedbread.ai large text embeddings (1024 dimensions)",
        defaults: "{}",
        settings_help: &[],
        accepts_images: false,
    },
];

pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    service_name: SERVICE,
    description: "Ollama local model runner",
    auth_schema: AuthSchema {
        required: &[],
        optional: &[SecretField::ApiKey],
    },
    connect,
    capabilities: &[Capability::Embeddings, Capability::Chat, Capability::Generate],
    embedding_models: EMBEDDING_MODELS,
};

pub fn connect(record: &CredentialRecord) -> Result<LiveConnection> {
    OllamaConnection::from_record(record).map(LiveConnection::Ollama)
}

pub struct OllamaConnection {
    base_url: url::Url,
    api_key: Option<String>,
    other_setting: Option<Value>,
    client: LazyClient,
}

impl std::fmt::Debug for OllamaConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaConnection")
            .field("base_url", &self.base_url.as_str())
            .field("initialized", &self.client.is_initialized())
            .finish_non_exhaustive()
    }
}

impl OllamaConnection {
    pub fn from_record(record: &CredentialRecord) -> Result<Self> {
        Ok(Self {
            base_url: http::parse_base_url(&setting_or(record, "base_url", DEFAULT_BASE_URL))?,
            api_key: record.api_key.clone().filter(|k| !k.is_empty()),
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

        let mut request = self.client.get()?.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        http::send_json(SERVICE, request).await
    }

    async fn encode_images(&self, images: &[String]) -> Result<Vec<String>> {
        let client = self.client.get()?;
        let mut encoded = Vec::with_capacity(images.len());
        for image in images {
            encoded.push(http::image_base64(SERVICE, client, image).await?);
        }
        Ok(encoded)
    }

    /// Any locally pulled model can embed; the catalog only lists common ones.
    pub async fn embeddings(
        &self,
        model: &str,
        input: EmbeddingInput,
        settings: Option<&Value>,
    ) -> Result<Vector> {
        let mut body = json!({ "model": model, "prompt": require_text(model, &input)? });
        if let Some(options) = settings.filter(|s| s.is_object()) {
            body["options"] = options.clone();
        }

        let response = self.post("api/embeddings", &body).await?;
        let embedding = http::parse_embedding(SERVICE, &response["embedding"])?;
        Ok(input.into_vector(embedding, model, settings))
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for msg in &request.messages {
            let images = self.encode_images(&msg.images).await?;
            messages.push((msg, images));
        }

        let body = chat_body(request, &messages);
        let response = self.post("api/chat", &body).await?;
        parse_chat_response(&response)
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let images = self.encode_images(&request.images).await?;
        let body = generate_body(request, &images);
        let response = self.post("api/generate", &body).await?;

        response["response"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| ProviderError::ResponseParse {
                service: SERVICE.to_owned(),
                reason: "missing `response` in generate output".into(),
            })
    }
}

// ---------------------------------------------------------------------------
// Wire format (free functions)
// ---------------------------------------------------------------------------

/// Build an `/api/chat` body. Images are already base64-encoded.
pub fn chat_body(request: &ChatRequest, messages: &[(&crate::types::ChatMessage, Vec<String>)]) -> Value {
    let wire: Vec<Value> = messages
        .iter()
        .map(|(msg, images)| {
            let mut m = json!({ "role": msg.role.as_str(), "content": msg.content });
            if !images.is_empty() {
                m["images"] = json!(images);
            }
            m
        })
        .collect();

    let mut body = json!({ "model": request.model, "messages": wire, "stream": false });
    let mut options = serde_json::Map::new();
    if let Some(temp) = request.temperature {
        options.insert("temperature".into(), json!(temp));
    }
    if let Some(max_tokens) = request.max_tokens {
        options.insert("num_predict".into(), json!(max_tokens));
    }
    if !options.is_empty() {
        body["options"] = Value::Object(options);
    }
    body
}

/// Build an `/api/generate` body. Images are already base64-encoded.
pub fn generate_body(request: &GenerateRequest, images: &[String]) -> Value {
    let mut body = json!({ "model": request.model, "prompt": request.prompt, "stream": false });
    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }
    if !images.is_empty() {
        body["images"] = json!(images);
    }
    body
}

pub fn parse_chat_response(v: &Value) -> Result<ChatResponse> {
    let content = v["message"]["content"]
        .as_str()
        .ok_or_else(|| ProviderError::ResponseParse {
            service: SERVICE.to_owned(),
            reason: "missing `message.content` in response".into(),
        })?;

    let usage = v.get("eval_count").map(|_| Usage {
        input_tokens: v["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["eval_count"].as_u64().unwrap_or(0) as u32,
    });

    Ok(ChatResponse {
        model: v["model"].as_str().unwrap_or_default().to_owned(),
        content: content.to_owned(),
        usage,
    })
}
