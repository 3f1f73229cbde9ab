use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::{MediaSource, Result, SourceError};

/// Platform name → source
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn MediaSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre une source, remplaçant celle de même plateforme
    pub fn register(&mut self, source: Arc<dyn MediaSource>) {
        let platform = source.platform().to_string();
        info!(platform = %platform, acquisition = ?source.acquisition(), "Registered media source");
        self.sources.insert(platform, source);
    }

    pub fn get(&self, platform: &str) -> Result<Arc<dyn MediaSource>> {
        self.sources
            .get(platform)
            .cloned()
            .ok_or_else(|| SourceError::UnknownPlatform(platform.to_string()))
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.sources.contains_key(platform)
    }

    pub fn platforms(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CatalogSource;

    #[test]
    fn unknown_platform_is_an_error() {
        let mut registry = SourceRegistry::new();
        assert!(registry.is_empty());

        let catalog = CatalogSource::from_yaml_str("platform: demo\ntracks: []\n").unwrap();
        registry.register(Arc::new(catalog));

        assert!(registry.contains("demo"));
        assert_eq!(registry.platforms(), vec!["demo".to_string()]);
        assert!(registry.get("demo").is_ok());
        assert!(matches!(
            registry.get("other"),
            Err(SourceError::UnknownPlatform(p)) if p == "other"
        ));
    }
}
