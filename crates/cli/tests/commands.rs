use cli::commands;
use indexer_core::config::{AppConfig, Secrets};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Points the vector store at a closed port and keeps blobs in memory.
fn offline_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.vectors.url = "http://127.0.0.1:9".into();
    cfg.vectors.max_retries = 0;
    cfg.vectors.timeout_secs = 2;
    cfg.blobs.provider = "memory".into();
    cfg
}

#[tokio::test]
async fn check_reports_unreachable_vector_store() {
    let cfg = offline_config();
    let report = commands::check(&cfg, &Secrets::default()).await.unwrap();
    assert_eq!(report.embedding_provider, "local");
    assert_eq!(report.embedding_dimension, 384);
    assert!(report.ocr_tiers.iter().all(|t| t == "local"));
    assert_eq!(report.collection_dimension, None);
    assert!(!report.is_ok());
    assert!(report.problems[0].contains("unreachable"));
}

#[tokio::test]
async fn check_lists_configured_cloud_tiers() {
    let cfg = offline_config();
    let secrets = Secrets {
        vision_endpoint: Some("https://vision.example.com".into()),
        vision_key: Some("k".into()),
        ..Secrets::default()
    };
    let report = commands::check(&cfg, &secrets).await.unwrap();
    assert_eq!(report.ocr_tiers.first().map(String::as_str), Some("vision"));
}

#[tokio::test]
async fn unknown_embedding_provider_is_rejected() {
    let mut cfg = offline_config();
    cfg.embeddings.provider = "word2vec".into();
    let err = commands::index(&cfg, &Secrets::default(), Arc::new(AtomicBool::new(false)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown embedding provider"));
}

#[tokio::test]
async fn index_refuses_to_run_without_a_collection() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a.txt"), "hello").unwrap();
    let mut cfg = offline_config();
    cfg.source.root = tmp.path().to_string_lossy().into_owned();
    let err = commands::index(&cfg, &Secrets::default(), Arc::new(AtomicBool::new(false)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("configuration error"));
}

#[tokio::test]
async fn purge_needs_a_reachable_collection() {
    let cfg = offline_config();
    assert!(commands::purge(&cfg, &Secrets::default(), "/Old").await.is_err());
}

