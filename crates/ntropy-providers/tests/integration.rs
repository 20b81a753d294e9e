//! Integration tests for the ntropy-providers crate.
//!
//! These tests exercise registry lookup, connection construction and
//! capability dispatch through the public API. Nothing here touches the
//! network: connections are lazy and every failing path short-circuits
//! before a request is sent.

use std::sync::Arc;

use ntropy_providers::types::{ChatMessage, ChatRequest, GenerateRequest};
use ntropy_providers::{Capability, ConnectionManager, ProviderError, ProviderRegistry, connections};
use ntropy_vault::CredentialRecord;
use serde_json::json;

fn credentials() -> Vec<CredentialRecord> {
    vec![
        CredentialRecord::new("AWS")
            .with_access_key("AKIAEXAMPLE1234")
            .with_secret_access_key("secret123")
            .with_other_setting(json!({ "region_name": "us-west-2" })),
        CredentialRecord::new("OpenAI").with_api_key("sk-test"),
        CredentialRecord::new("Anthropic").with_api_key("sk-ant-test"),
        CredentialRecord::new("Ollama"),
        CredentialRecord::new("Pinecone")
            .with_api_key("pc-test")
            .with_other_setting(json!({ "index_name": "docs" })),
    ]
}

fn connected() -> (ProviderRegistry, ConnectionManager) {
    let registry = ProviderRegistry::builtin();
    let manager = ConnectionManager::new();
    for record in credentials() {
        let descriptor = registry.lookup(&record.service_name).unwrap();
        let conn = descriptor.build_connection(&record).unwrap();
        manager.register(record.service_name.clone(), conn);
    }
    (registry, manager)
}

// ═══════════════════════════════════════════════════════════════════════
//  Registry → connection
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn every_builtin_provider_connects_without_io() {
    let (registry, manager) = connected();
    assert_eq!(manager.len(), registry.len());

    for name in manager.names() {
        let conn = manager.get(&name).unwrap();
        assert_eq!(conn.service_name(), name);
        assert!(!conn.is_initialized());
    }
}

#[test]
fn aws_connection_keeps_region_setting() {
    let (_registry, manager) = connected();
    let conn = manager.get("AWS").unwrap();
    let aws = conn.as_aws().unwrap();
    assert_eq!(aws.region_name(), "us-west-2");
    assert_eq!(conn.other_setting().unwrap()["region_name"], "us-west-2");
}

#[test]
fn descriptor_capabilities_match_connections() {
    let registry = ProviderRegistry::builtin();
    for descriptor in registry.descriptors() {
        let has_models = !descriptor.embedding_models.is_empty();
        assert_eq!(
            has_models,
            descriptor.supports(Capability::Embeddings),
            "{}",
            descriptor.service_name
        );
    }
}

#[test]
fn schema_mismatch_surfaces_instead_of_panicking() {
    let registry = ProviderRegistry::builtin();
    let record = CredentialRecord::new("Pinecone");
    let err = registry
        .lookup("Pinecone")
        .unwrap()
        .build_connection(&record)
        .unwrap_err();
    assert!(matches!(err, ProviderError::SchemaMismatch { .. }));
}

// ═══════════════════════════════════════════════════════════════════════
//  Capability dispatch
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chat_on_embeddings_only_provider_is_unsupported() {
    let (_registry, manager) = connected();
    let request = ChatRequest::new("x", vec![ChatMessage::user("hi")]);
    let err = connections::chat(&manager, "AWS", &request).await.unwrap_err();
    assert!(matches!(err, ProviderError::UnsupportedCapability { .. }));
}

#[tokio::test]
async fn generate_is_ollama_only() {
    let (_registry, manager) = connected();
    let request = GenerateRequest::new("x", "hi");
    for service in ["AWS", "OpenAI", "Anthropic", "Pinecone"] {
        let err = connections::generate(&manager, service, &request)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProviderError::UnsupportedCapability { .. }),
            "{service}"
        );
    }
}

#[tokio::test]
async fn invalid_input_fails_before_any_request() {
    let (registry, manager) = connected();
    let settings = json!({ "dimensions": 333 });
    let err = connections::embeddings_for_model(
        &registry,
        &manager,
        "amazon.titan-embed-text-v2:0",
        "hello".into(),
        Some(&settings),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidInput { .. }));

    let request = ChatRequest::new(
        "gpt-4o-mini",
        vec![ChatMessage::user("look").with_images(vec!["./local.png".into()])],
    );
    let err = connections::chat(&manager, "OpenAI", &request).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidInput { .. }));
}

#[tokio::test]
async fn concurrent_lookups_see_registered_connections() {
    let (_registry, manager) = connected();
    let manager = Arc::new(manager);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let m = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                m.get("OpenAI").is_some()
            } else {
                m.get("Mistral").is_none()
            }
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }
}
