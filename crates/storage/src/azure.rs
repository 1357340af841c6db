//! Azure Blob container reached through a SAS URL.

use crate::{content_hash, validate_key, BlobError, BlobStore, PutOutcome};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::warn;

const API_VERSION: &str = "2021-08-06";
const HASH_META: &str = "x-ms-meta-contenthash";

#[derive(Debug, Clone)]
pub struct AzureBlobConfig {
    /// Container URL including the SAS query string.
    pub sas_url: String,
    pub timeout: Duration,
    pub max_retries: usize,
}

pub struct AzureBlobStore {
    client: Client,
    base: String,
    sas: String,
    max_retries: usize,
}

impl AzureBlobStore {
    pub fn new(cfg: AzureBlobConfig) -> Result<Self, BlobError> {
        let (base, sas) = match cfg.sas_url.split_once('?') {
            Some((base, sas)) if !sas.is_empty() => (base, sas),
            _ => {
                return Err(BlobError::Config(
                    "blob SAS URL must carry a query string token".into(),
                ))
            }
        };
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| BlobError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            sas: sas.to_string(),
            max_retries: cfg.max_retries.max(1),
        })
    }

    fn blob_url(&self, key: &str) -> String {
        format!("{}/{}?{}", self.base, key, self.sas)
    }

    fn list_url(&self, marker: Option<&str>) -> String {
        let mut url = format!("{}?restype=container&comp=list&{}", self.base, self.sas);
        if let Some(marker) = marker {
            url.push_str("&marker=");
            url.push_str(&urlencode(marker));
        }
        url
    }

    async fn send<F>(&self, label: &str, build: F) -> Result<Response, BlobError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let result = build()
                .header("x-ms-version", API_VERSION)
                .send()
                .await
                .map_err(BlobError::from);
            let err = match result {
                Ok(resp) if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND => {
                    return Ok(resp)
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    BlobError::Status { status, body }
                }
                Err(e) => e,
            };
            if !err.is_transient() || attempt >= self.max_retries {
                return Err(err);
            }
            let delay = Duration::from_millis(500 * (1 << attempt.min(5)) as u64);
            warn!("blob {} failed ({}), retrying in {:?}", label, err, delay);
            tokio::time::sleep(delay).await;
        }
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Blob names and the continuation marker from one `List Blobs` page.
fn parse_listing(xml: &str) -> Result<(Vec<String>, Option<String>), BlobError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut names = Vec::new();
    let mut marker = None;
    let mut in_blob = false;
    let mut current: Option<&'static str> = None;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"Blob" => in_blob = true,
                b"Name" if in_blob => current = Some("name"),
                b"NextMarker" => current = Some("marker"),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| BlobError::Listing(e.to_string()))?
                    .into_owned();
                match current {
                    Some("name") => names.push(text),
                    Some("marker") if !text.is_empty() => marker = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Blob" {
                    in_blob = false;
                }
                current = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(BlobError::Listing(e.to_string())),
            _ => {}
        }
    }
    Ok((names, marker))
}

#[async_trait::async_trait]
impl BlobStore for AzureBlobStore {
    fn name(&self) -> &str {
        "azure"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<PutOutcome, BlobError> {
        validate_key(key)?;
        let hash = content_hash(bytes);
        if self.content_hash(key).await?.as_deref() == Some(hash.as_str()) {
            return Ok(PutOutcome::Unchanged);
        }
        let url = self.blob_url(key);
        let body = bytes.to_vec();
        let resp = self
            .send("put", || {
                self.client
                    .put(&url)
                    .header("x-ms-blob-type", "BlockBlob")
                    .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
                    .header(HASH_META, &hash)
                    .body(body.clone())
            })
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BlobError::Config("blob container not found".into()));
        }
        Ok(PutOutcome::Written)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        validate_key(key)?;
        let url = self.blob_url(key);
        let resp = self.send("get", || self.client.get(&url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<bool, BlobError> {
        validate_key(key)?;
        let url = self.blob_url(key);
        let resp = self.send("delete", || self.client.delete(&url)).await?;
        Ok(resp.status() != StatusCode::NOT_FOUND)
    }

    async fn content_hash(&self, key: &str) -> Result<Option<String>, BlobError> {
        validate_key(key)?;
        let url = self.blob_url(key);
        let resp = self.send("head", || self.client.head(&url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if let Some(hash) = resp.headers().get(HASH_META).and_then(|v| v.to_str().ok()) {
            return Ok(Some(hash.to_string()));
        }
        // Uploaded by something else; hash the body.
        Ok(self.get(key).await?.map(|b| content_hash(&b)))
    }

    async fn list_keys(&self) -> Result<Vec<String>, BlobError> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let url = self.list_url(marker.as_deref());
            let resp = self.send("list", || self.client.get(&url)).await?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Err(BlobError::Config("blob container not found".into()));
            }
            let xml = resp.text().await?;
            let (names, next) = parse_listing(&xml)?;
            keys.extend(names);
            match next {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="docs">
  <Blobs>
    <Blob><Name>0b7c0c52-3a43-4f5e-8f0a-1b2c3d4e5f60.txt</Name><Properties><Content-Length>12</Content-Length></Properties></Blob>
    <Blob><Name>a&amp;b.txt</Name><Properties /></Blob>
  </Blobs>
  <NextMarker>2!72!MDAwMDE</NextMarker>
</EnumerationResults>"#;

    #[test]
    fn parses_names_and_marker() {
        let (names, marker) = parse_listing(PAGE).unwrap();
        assert_eq!(
            names,
            vec!["0b7c0c52-3a43-4f5e-8f0a-1b2c3d4e5f60.txt", "a&b.txt"]
        );
        assert_eq!(marker.as_deref(), Some("2!72!MDAwMDE"));
    }

    #[test]
    fn last_page_has_no_marker() {
        let xml = "<EnumerationResults><Blobs></Blobs><NextMarker /></EnumerationResults>";
        let (names, marker) = parse_listing(xml).unwrap();
        assert!(names.is_empty());
        assert!(marker.is_none());
    }

    #[test]
    fn splits_sas_url() {
        let store = AzureBlobStore::new(AzureBlobConfig {
            sas_url: "https://acct.blob.core.windows.net/docs?sv=2021&sig=abc".into(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
        })
        .unwrap();
        assert_eq!(
            store.blob_url("x.txt"),
            "https://acct.blob.core.windows.net/docs/x.txt?sv=2021&sig=abc"
        );
        assert!(store
            .list_url(Some("2!72"))
            .ends_with("comp=list&sv=2021&sig=abc&marker=2%2172"));
    }

    #[test]
    fn rejects_url_without_token() {
        assert!(AzureBlobStore::new(AzureBlobConfig {
            sas_url: "https://acct.blob.core.windows.net/docs".into(),
            timeout: Duration::from_secs(5),
            max_retries: 2,
        })
        .is_err());
    }
}
