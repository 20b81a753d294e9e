//! AWS Bedrock connection.
//!
//! Embeddings go through Bedrock `InvokeModel`, signed with SigV4 using the
//! stored access key pair. `region_name` and `service_name` come from the
//! credential's `other_setting` and default to `us-east-1` and `bedrock`.

use ntropy_vault::{CredentialRecord, SecretField};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Value, json};

use crate::error::{ProviderError, Result};
use crate::http::{self, LazyClient};
use crate::providers::sigv4::{self, Credentials, SigningParams};
use crate::providers::{LiveConnection, required_secret, setting_or};
use crate::registry::{AuthSchema, Capability, EmbeddingModel, ProviderDescriptor};
use crate::types::{EmbeddingInput, Vector};

pub const SERVICE: &str = "AWS";

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SERVICE_NAME: &str = "bedrock";

pub const TITAN_EMBED_TEXT_V2: &str = "amazon.titan-embed-text-v2:0";
pub const TITAN_EMBED_IMAGE_V1: &str = "amazon.titan-embed-image-v1";

/// Output sizes both Titan embedding models accept.
const ALLOWED_DIMENSIONS: [u64; 3] = [256, 512, 1024];

pub const EMBEDDING_MODELS: &[EmbeddingModel] = &[
    EmbeddingModel {
        name: TITAN_EMBED_IMAGE_V1,
        service: SERVICE,
        description: "Amazon Titan Multimodal Embeddings G1",
        defaults: r#"{"embeddingConfig":{"outputEmbeddingLength":512}}"#,
        settings_help: &[(
            "embeddingConfig.outputEmbeddingLength",
            "Only the following values are accepted: 256, 512, 1024.",
        )],
        accepts_images: true,
    },
    EmbeddingModel {
        name: TITAN_EMBED_TEXT_V2,
        service: SERVICE,
        description: "Amazon Titan Text Embeddings V2",
        defaults: r#"{"dimensions":1024,"normalize":true}"#,
        settings_help: &[
            (
                "dimensions",
                "Only the following values are accepted: 1024 (default), 512, 256.",
            ),
            ("normalize", "true or false"),
        ],
        accepts_images: false,
    },
];

pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    service_name: SERVICE,
    description: "Amazon Bedrock (Titan embeddings)",
    auth_schema: AuthSchema {
        required: &[SecretField::AccessKey, SecretField::SecretAccessKey],
        optional: &[],
    },
    connect,
    capabilities: &[Capability::Embeddings],
    embedding_models: EMBEDDING_MODELS,
};

/// Registry constructor.
pub fn connect(record: &CredentialRecord) -> Result<LiveConnection> {
    AwsConnection::from_record(record).map(LiveConnection::Aws)
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

pub struct AwsConnection {
    access_key: String,
    secret_access_key: String,
    region_name: String,
    service_name: String,
    /// Overrides the regional runtime endpoint (e.g. for a VPC endpoint).
    endpoint_url: Option<url::Url>,
    other_setting: Option<Value>,
    client: LazyClient,
}

impl std::fmt::Debug for AwsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsConnection")
            .field("region_name", &self.region_name)
            .field("service_name", &self.service_name)
            .field("endpoint_url", &self.endpoint_url.as_ref().map(url::Url::as_str))
            .field("initialized", &self.client.is_initialized())
            .finish_non_exhaustive()
    }
}

impl AwsConnection {
    pub fn from_record(record: &CredentialRecord) -> Result<Self> {
        let endpoint_url = record
            .setting_str("endpoint_url")
            .map(http::parse_base_url)
            .transpose()?;

        Ok(Self {
            access_key: required_secret(SERVICE, record, SecretField::AccessKey)?,
            secret_access_key: required_secret(SERVICE, record, SecretField::SecretAccessKey)?,
            region_name: setting_or(record, "region_name", DEFAULT_REGION),
            service_name: setting_or(record, "service_name", DEFAULT_SERVICE_NAME),
            endpoint_url,
            other_setting: record.other_setting.clone(),
            client: LazyClient::new(SERVICE),
        })
    }

    pub fn region_name(&self) -> &str {
        &self.region_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
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

    /// Base URL of the Bedrock runtime API.
    pub fn runtime_endpoint(&self) -> String {
        match &self.endpoint_url {
            Some(url) => url.as_str().trim_end_matches('/').to_owned(),
            None => format!("https://{}-runtime.{}.amazonaws.com", self.service_name, self.region_name),
        }
    }

    /// Call Bedrock `InvokeModel` with a JSON body.
    pub async fn invoke_model(&self, model_id: &str, body: &Value) -> Result<Value> {
        let client = self.client.get()?;

        let raw = format!(
            "{}/model/{}/invoke",
            self.runtime_endpoint(),
            sigv4::uri_encode(model_id)
        );
        let url = url::Url::parse(&raw).map_err(|e| ProviderError::Config {
            reason: format!("invalid Bedrock endpoint `{raw}`: {e}"),
        })?;
        let payload = serde_json::to_vec(body).map_err(|e| ProviderError::InvalidInput {
            reason: format!("cannot serialize request body: {e}"),
        })?;

        let signed = sigv4::sign(
            &SigningParams {
                credentials: Credentials {
                    access_key: &self.access_key,
                    secret_key: &self.secret_access_key,
                },
                region: &self.region_name,
                service: &self.service_name,
                time: chrono::Utc::now(),
            },
            "POST",
            &url,
            &[("accept", "application/json"), ("content-type", "application/json")],
            &payload,
        );

        tracing::debug!(model = model_id, region = %self.region_name, "invoking Bedrock model");

        let request = client
            .post(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header("x-amz-date", signed.amz_date)
            .header(AUTHORIZATION, signed.authorization)
            .body(payload);

        http::send_json(SERVICE, request).await
    }

    /// Compute a Titan embedding.
    pub async fn embeddings(
        &self,
        model: &str,
        input: EmbeddingInput,
        settings: Option<&Value>,
    ) -> Result<Vector> {
        let image_b64 = match input.image() {
            Some(image) => Some(http::image_base64(SERVICE, self.client.get()?, image).await?),
            None => None,
        };

        let body = embedding_body(model, input.text_content(), image_b64.as_deref(), settings)?;
        let response = self.invoke_model(model, &body).await?;
        let embedding = http::parse_embedding(SERVICE, &response["embedding"])?;

        Ok(input.into_vector(embedding, model, settings))
    }
}

// ---------------------------------------------------------------------------
// Request building (free functions)
// ---------------------------------------------------------------------------

fn dimension_setting(value: Option<&Value>, name: &str, default: u64) -> Result<u64> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(default);
    };
    match value.as_u64() {
        Some(n) if ALLOWED_DIMENSIONS.contains(&n) => Ok(n),
        _ => Err(ProviderError::InvalidInput {
            reason: format!("{name} must be one of 256, 512, 1024, got {value}"),
        }),
    }
}

/// Build the `InvokeModel` body for a Titan embedding model.
///
/// `settings` override the model defaults; unknown models are
/// [`ProviderError::ModelNotFound`].
pub fn embedding_body(
    model: &str,
    text: Option<&str>,
    image_b64: Option<&str>,
    settings: Option<&Value>,
) -> Result<Value> {
    let setting = |key: &str| settings.and_then(|s| s.get(key));

    match model {
        TITAN_EMBED_TEXT_V2 => {
            if image_b64.is_some() {
                return Err(ProviderError::InvalidInput {
                    reason: format!("model {model} only accepts text input"),
                });
            }
            let text = text.ok_or_else(|| ProviderError::InvalidInput {
                reason: format!("model {model} requires text input"),
            })?;
            let normalize = match setting("normalize") {
                None | Some(Value::Null) => true,
                Some(Value::Bool(b)) => *b,
                Some(other) => {
                    return Err(ProviderError::InvalidInput {
                        reason: format!("normalize must be a boolean, got {other}"),
                    });
                }
            };
            Ok(json!({
                "inputText": text,
                "dimensions": dimension_setting(setting("dimensions"), "dimensions", 1024)?,
                "normalize": normalize,
            }))
        }
        TITAN_EMBED_IMAGE_V1 => {
            if text.is_none() && image_b64.is_none() {
                return Err(ProviderError::InvalidInput {
                    reason: format!("model {model} requires text or image input"),
                });
            }
            let length = dimension_setting(
                setting("embeddingConfig").and_then(|c| c.get("outputEmbeddingLength")),
                "outputEmbeddingLength",
                512,
            )?;

            let mut body = json!({ "embeddingConfig": { "outputEmbeddingLength": length } });
            if let Some(text) = text {
                body["inputText"] = json!(text);
            }
            if let Some(image) = image_b64 {
                body["inputImage"] = json!(image);
            }
            Ok(body)
        }
        other => Err(ProviderError::ModelNotFound {
            model: other.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(settings: Value) -> CredentialRecord {
        CredentialRecord::new(SERVICE)
            .with_access_key("AKIAEXAMPLE1234")
            .with_secret_access_key("secret123")
            .with_other_setting(settings)
    }

    #[test]
    fn settings_override_defaults() {
        let conn = AwsConnection::from_record(&record(json!({ "region_name": "us-west-2" }))).unwrap();
        assert_eq!(conn.region_name(), "us-west-2");
        assert_eq!(conn.service_name(), "bedrock");
        assert_eq!(
            conn.runtime_endpoint(),
            "https://bedrock-runtime.us-west-2.amazonaws.com"
        );
        assert!(!conn.is_initialized());
    }

    #[test]
    fn defaults_without_settings() {
        let rec = CredentialRecord::new(SERVICE)
            .with_access_key("AKIAEXAMPLE1234")
            .with_secret_access_key("secret123");
        let conn = AwsConnection::from_record(&rec).unwrap();
        assert_eq!(conn.region_name(), DEFAULT_REGION);
    }

    #[test]
    fn endpoint_override_is_validated() {
        let conn = AwsConnection::from_record(&record(
            json!({ "endpoint_url": "https://vpce.example.com/" }),
        ))
        .unwrap();
        assert_eq!(conn.runtime_endpoint(), "https://vpce.example.com");

        let bad = AwsConnection::from_record(&record(json!({ "endpoint_url": "::" })));
        assert!(matches!(bad, Err(ProviderError::Config { .. })));
    }

    #[test]
    fn debug_hides_keys() {
        let conn = AwsConnection::from_record(&record(json!({}))).unwrap();
        let rendered = format!("{conn:?}");
        assert!(!rendered.contains("secret123"));
        assert!(!rendered.contains("AKIAEXAMPLE1234"));
    }

    #[test]
    fn text_v2_body_uses_defaults() {
        let body = embedding_body(TITAN_EMBED_TEXT_V2, Some("hello"), None, None).unwrap();
        assert_eq!(
            body,
            json!({ "inputText": "hello", "dimensions": 1024, "normalize": true })
        );
    }

    #[test]
    fn text_v2_body_applies_settings() {
        let settings = json!({ "dimensions": 256, "normalize": false });
        let body = embedding_body(TITAN_EMBED_TEXT_V2, Some("hi"), None, Some(&settings)).unwrap();
        assert_eq!(body["dimensions"], 256);
        assert_eq!(body["normalize"], false);
    }

    #[test]
    fn text_v2_rejects_bad_dimensions() {
        let settings = json!({ "dimensions": 300 });
        let err = embedding_body(TITAN_EMBED_TEXT_V2, Some("hi"), None, Some(&settings)).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput { .. }));
    }

    #[test]
    fn text_v2_rejects_images() {
        assert!(embedding_body(TITAN_EMBED_TEXT_V2, Some("x"), Some("aGk="), None).is_err());
    }

    #[test]
    fn image_v1_body_carries_image_and_length() {
        let settings = json!({ "embeddingConfig": { "outputEmbeddingLength": 256 } });
        let body = embedding_body(TITAN_EMBED_IMAGE_V1, None, Some("aGk="), Some(&settings)).unwrap();
        assert_eq!(body["inputImage"], "aGk=");
        assert_eq!(body["embeddingConfig"]["outputEmbeddingLength"], 256);
        assert!(body.get("inputText").is_none());
    }

    #[test]
    fn image_v1_requires_some_input() {
        assert!(embedding_body(TITAN_EMBED_IMAGE_V1, None, None, None).is_err());
    }

    #[test]
    fn unknown_model_is_not_found() {
        let err = embedding_body("amazon.nope", Some("x"), None, None).unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound { .. }));
    }
}
