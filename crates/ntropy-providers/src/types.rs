//! Core data types shared by every provider.
//!
//! Documents and chunks flow into embedding calls, [`Vector`]s flow out and
//! into the vector store, and chat messages flow into chat/generation models.
//! These types are provider-agnostic; each provider module translates them
//! into its own wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata attached to documents, chunks and vectors.
pub type Metadata = Map<String, Value>;

fn new_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// One page of a loaded source document: text, an image, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "new_id")]
    pub id: String,
    pub page_number: i64,
    #[serde(default)]
    pub page_content: Option<String>,
    /// Local path or `http(s)` URL of the page image.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// A text page.
    pub fn text(page_number: i64, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            page_number,
            page_content: Some(content.into()),
            image: None,
            metadata: Metadata::new(),
        }
    }

    /// An image page.
    pub fn image(page_number: i64, image: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            page_number,
            page_content: None,
            image: Some(image.into()),
            metadata: Metadata::new(),
        }
    }
}

/// A slice of a document's text produced by a chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    #[serde(default = "new_id")]
    pub id: String,
    pub chunk: String,
    pub chunk_number: i64,
    pub document_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TextChunk {
    pub fn new(document_id: impl Into<String>, chunk_number: i64, chunk: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            chunk: chunk.into(),
            chunk_number,
            document_id: document_id.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Anything an embedding model can consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingInput {
    Document(Document),
    Chunk(TextChunk),
    Text { text: String },
}

impl EmbeddingInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Text content, if any.
    pub fn text_content(&self) -> Option<&str> {
        let text = match self {
            Self::Document(doc) => doc.page_content.as_deref(),
            Self::Chunk(chunk) => Some(chunk.chunk.as_str()),
            Self::Text { text } => Some(text.as_str()),
        };
        text.filter(|t| !t.is_empty())
    }

    /// Image reference, if any. Only documents carry images.
    pub fn image(&self) -> Option<&str> {
        match self {
            Self::Document(doc) => doc.image.as_deref().filter(|i| !i.is_empty()),
            _ => None,
        }
    }

    /// Id of the document the embedding will belong to.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::Document(doc) => Some(doc.id.as_str()),
            Self::Chunk(chunk) => Some(chunk.document_id.as_str()),
            Self::Text { .. } => None,
        }
    }

    pub fn chunk_number(&self) -> Option<i64> {
        match self {
            Self::Chunk(chunk) => Some(chunk.chunk_number),
            _ => None,
        }
    }

    /// Wrap a raw embedding into a [`Vector`] that remembers where it came
    /// from and which model produced it.
    pub fn into_vector(self, embedding: Vec<f32>, model: &str, settings: Option<&Value>) -> Vector {
        let data_type = if self.text_content().is_some() {
            DataType::Text
        } else {
            DataType::Image
        };

        let mut metadata = Metadata::new();
        metadata.insert("model".into(), Value::from(model));
        metadata.insert(
            "model_settings".into(),
            settings.cloned().unwrap_or(Value::Null),
        );
        metadata.insert(
            "timestamp".into(),
            Value::from(chrono::Utc::now().to_rfc3339()),
        );
        if let Some(chunk) = self.chunk_number() {
            metadata.insert("chunk".into(), Value::from(chunk));
        }
        if let (DataType::Image, Some(image)) = (data_type, self.image()) {
            metadata.insert("image_path".into(), Value::from(image));
        }

        let content = match data_type {
            DataType::Text => self.text_content(),
            DataType::Image => self.image(),
        };
        let content = content.unwrap_or_default().to_owned();

        Vector {
            id: new_id(),
            document_id: self.document_id().map(str::to_owned),
            size: embedding.len(),
            vector: embedding,
            data_type,
            content,
            metadata,
        }
    }
}

impl From<Document> for EmbeddingInput {
    fn from(doc: Document) -> Self {
        Self::Document(doc)
    }
}

impl From<TextChunk> for EmbeddingInput {
    fn from(chunk: TextChunk) -> Self {
        Self::Chunk(chunk)
    }
}

impl From<&str> for EmbeddingInput {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

// ---------------------------------------------------------------------------
// Vectors
// ---------------------------------------------------------------------------

/// What kind of content an embedding was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    Image,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

/// An embedding together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub id: String,
    pub document_id: Option<String>,
    pub vector: Vec<f32>,
    pub size: usize,
    pub data_type: DataType,
    /// The embedded text, or the image reference for image embeddings.
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A single vector store hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Image references (local paths or URLs) attached to the message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// A chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Token usage statistics for a single request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The assistant's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub content: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// A single-shot completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            images: Vec::new(),
        }
    }
}
