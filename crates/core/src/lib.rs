//! Core library: sync decisions, extraction, OCR escalation, embeddings,
//! hybrid storage, the crawl pipeline and the query path.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod hybrid;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod report;
pub mod sampling;
pub mod search;
pub mod source;
pub mod sparse;
pub mod sync;
pub mod vectorstore;
