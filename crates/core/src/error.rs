use providers::ProviderError;
use storage::BlobError;
use thiserror::Error;

/// Failure classes of an indexing run. Only `Configuration` aborts the run;
/// everything else is recorded against the file and the run moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("provider error: {0}")]
    TransientProvider(String),
    #[error("corrupt input: {0}")]
    CorruptInput(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("storage inconsistency: {0}")]
    StorageInconsistency(String),
}

impl IndexError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexError::Configuration(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IndexError::Configuration(_) => "configuration",
            IndexError::TransientProvider(_) => "provider",
            IndexError::CorruptInput(_) => "corrupt_input",
            IndexError::UnsupportedFormat(_) => "unsupported_format",
            IndexError::StorageInconsistency(_) => "storage_inconsistency",
        }
    }
}

impl From<ProviderError> for IndexError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Config(msg) => IndexError::Configuration(msg),
            ProviderError::UnknownProvider(name) => {
                IndexError::Configuration(format!("unknown provider {}", name))
            }
            ProviderError::UnsupportedInput(msg) => IndexError::UnsupportedFormat(msg),
            other => IndexError::TransientProvider(other.to_string()),
        }
    }
}

impl From<BlobError> for IndexError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Config(msg) => IndexError::Configuration(msg),
            other => IndexError::TransientProvider(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_onto_taxonomy() {
        let e: IndexError = ProviderError::Config("no key".into()).into();
        assert!(e.is_fatal());
        let e: IndexError = ProviderError::Timeout("2m".into()).into();
        assert_eq!(e.kind(), "provider");
        assert!(!e.is_fatal());
        let e: IndexError = ProviderError::UnsupportedInput("tiff".into()).into();
        assert_eq!(e.kind(), "unsupported_format");
    }
}
