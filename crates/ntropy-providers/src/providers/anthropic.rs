//! Anthropic connection: Messages API chat.

use ntropy_vault::{CredentialRecord, SecretField};
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};

use crate::error::{ProviderError, Result};
use crate::http::{self, LazyClient};
use crate::providers::{LiveConnection, required_secret, setting_or};
use crate::registry::{AuthSchema, Capability, ProviderDescriptor};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, Role, Usage};

pub const SERVICE: &str = "Anthropic";

/// Default Anthropic API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory for the Messages API.
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    service_name: SERVICE,
    description: "Anthropic Messages API chat",
    auth_schema: AuthSchema {
        required: &[SecretField::ApiKey],
        optional: &[],
    },
    connect,
    capabilities: &[Capability::Chat],
    embedding_models: &[],
};

pub fn connect(record: &CredentialRecord) -> Result<LiveConnection> {
    AnthropicConnection::from_record(record).map(LiveConnection::Anthropic)
}

pub struct AnthropicConnection {
    api_key: String,
    base_url: url::Url,
    other_setting: Option<Value>,
    client: LazyClient,
}

impl std::fmt::Debug for AnthropicConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConnection")
            .field("base_url", &self.base_url.as_str())
            .field("initialized", &self.client.is_initialized())
            .finish_non_exhaustive()
    }
}

impl AnthropicConnection {
    pub fn from_record(record: &CredentialRecord) -> Result<Self> {
        Ok(Self {
            api_key: required_secret(SERVICE, record, SecretField::ApiKey)?,
            base_url: http::parse_base_url(&setting_or(record, "base_url", DEFAULT_BASE_URL))?,
            other_setting: record.other_setting.clone(),
            client: LazyClient::new(SERVICE),
        })
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

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = chat_body(request)?;
        let url = http::endpoint(&self.base_url, "v1/messages");

        tracing::debug!(url = %url, model = %request.model, provider = SERVICE, "sending request");

        let req = self
            .client
            .get()?
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(CONTENT_TYPE, "application/json")
            .json(&body);

        let response = http::send_json(SERVICE, req).await?;
        parse_chat_response(&response)
    }
}

/// Split out system messages (Anthropic takes them as a top-level field) and
/// convert the rest to content blocks.
pub fn messages_to_anthropic(messages: &[ChatMessage]) -> Result<(Option<String>, Vec<Value>)> {
    let mut system_parts = Vec::new();
    let mut wire = Vec::with_capacity(messages.len());

    for msg in messages {
        if msg.role == Role::System {
            system_parts.push(msg.content.clone());
            continue;
        }

        let mut content = Vec::with_capacity(msg.images.len() + 1);
        for image in &msg.images {
            if !http::is_remote(image) {
                return Err(ProviderError::InvalidInput {
                    reason: format!("image must be a URL for Anthropic: {image}"),
                });
            }
            content.push(json!({ "type": "image", "source": { "type": "url", "url": image } }));
        }
        content.push(json!({ "type": "text", "text": msg.content }));

        wire.push(json!({ "role": msg.role.as_str(), "content": content }));
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    Ok((system, wire))
}

/// Build a Messages API request body.
pub fn chat_body(request: &ChatRequest) -> Result<Value> {
    let (system, messages) = messages_to_anthropic(&request.messages)?;
    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }
    Ok(body)
}

/// Parse a non-streaming Messages API response.
pub fn parse_chat_response(v: &Value) -> Result<ChatResponse> {
    let blocks = v["content"]
        .as_array()
        .ok_or_else(|| ProviderError::ResponseParse {
            service: SERVICE.to_owned(),
            reason: "missing `content` array in response".into(),
        })?;

    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();

    let usage = v.get("usage").map(|u| Usage {
        input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
    });

    Ok(ChatResponse {
        model: v["model"].as_str().unwrap_or_default().to_owned(),
        content: text,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_hoisted() {
        let request = ChatRequest::new(
            "claude-sonnet-4-20250514",
            vec![ChatMessage::system("You are helpful."), ChatMessage::user("Hello")],
        );
        let body = chat_body(&request).unwrap();

        assert_eq!(body["system"], "You are helpful.");
        assert_eq!(body["max_tokens"], 1024);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["text"], "Hello");
    }

    #[test]
    fn images_become_url_sources() {
        let messages =
            vec![ChatMessage::user("Describe").with_images(vec!["https://x.test/a.jpg".into()])];
        let (system, wire) = messages_to_anthropic(&messages).unwrap();
        assert!(system.is_none());
        assert_eq!(wire[0]["content"][0]["source"]["url"], "https://x.test/a.jpg");
        assert_eq!(wire[0]["content"][1]["type"], "text");
    }

    #[test]
    fn parse_response_joins_text_blocks() {
        let v = json!({
            "model": "claude",
            "content": [
                { "type": "text", "text": "Hello, " },
                { "type": "text", "text": "world" }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 3 }
        });
        let resp = parse_chat_response(&v).unwrap();
        assert_eq!(resp.content, "Hello, world");
        assert_eq!(resp.usage.unwrap().input_tokens, 10);
    }

    #[test]
    fn parse_response_requires_content() {
        assert!(parse_chat_response(&json!({})).is_err());
    }
}
