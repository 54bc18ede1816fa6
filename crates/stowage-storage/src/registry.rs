//! Scheme-to-adapter lookup.

use std::collections::HashMap;

use stowage_core::error::{Result, StowageError};

use crate::backend::Backend;
use crate::file::FileBackend;
use crate::uri::TargetUri;

/// Builds an uninitialized backend.
pub type BackendConstructor = fn() -> Box<dyn Backend>;

/// Map from URI scheme to adapter constructor.
pub struct BackendRegistry {
    constructors: HashMap<&'static str, BackendConstructor>,
}

impl Default for BackendRegistry {
    /// Registry with every adapter compiled into this build.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(crate::file::SCHEME, || Box::new(FileBackend::new()));
        #[cfg(feature = "s3")]
        registry.register(crate::s3::SCHEME, || Box::new(crate::s3::S3Backend::new()));
        registry
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Add or replace the adapter for `scheme`.
    pub fn register(&mut self, scheme: &'static str, constructor: BackendConstructor) {
        self.constructors.insert(scheme, constructor);
    }

    pub fn schemes(&self) -> Vec<&'static str> {
        let mut schemes: Vec<_> = self.constructors.keys().copied().collect();
        schemes.sort_unstable();
        schemes
    }

    /// Resolve the adapter for a target URI. The backend is returned uninitialized.
    pub fn backend_for_uri(&self, uri: &str) -> Result<Box<dyn Backend>> {
        let target = TargetUri::parse(uri)?;
        let constructor = self
            .constructors
            .get(target.scheme.as_str())
            .ok_or_else(|| StowageError::InvalidUri(uri.to_string()))?;
        tracing::debug!(scheme = %target.scheme, "resolved backend for {uri}");
        Ok(constructor())
    }
}

/// Resolve a target URI against the default registry.
pub fn backend_for_uri(uri: &str) -> Result<Box<dyn Backend>> {
    BackendRegistry::default().backend_for_uri(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_file_backend() {
        let backend = backend_for_uri("file:///tmp/somewhere").unwrap();
        assert_eq!(backend.scheme(), "file");
        assert!(!backend.is_initialized());
    }

    #[cfg(feature = "s3")]
    #[test]
    fn resolves_s3_backend() {
        let backend = backend_for_uri("s3://bucket_name").unwrap();
        assert_eq!(backend.scheme(), "s3");
        assert!(!backend.is_initialized());
    }

    #[test]
    fn unknown_scheme_is_invalid_uri() {
        assert!(matches!(
            backend_for_uri("nots3://goodbucket"),
            Err(StowageError::InvalidUri(_))
        ));
    }

    #[test]
    fn missing_bucket_is_invalid_uri() {
        assert!(matches!(
            backend_for_uri("s3://"),
            Err(StowageError::InvalidUri(_))
        ));
    }

    #[test]
    fn custom_registration() {
        let mut registry = BackendRegistry::empty();
        assert!(registry.backend_for_uri("file:///x").is_err());
        registry.register("file", || Box::new(FileBackend::new()));
        assert_eq!(registry.schemes(), vec!["file"]);
        assert!(registry.backend_for_uri("file:///x").is_ok());
    }
}
