//! Extension pour construire le cache média depuis partyconfig

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use partyconfig::Config;

use crate::{CacheSettings, HttpFetcher, MediaCache};

/// Trait d'extension de `partyconfig::Config` pour le cache média
///
/// ```rust,ignore
/// use partyconfig::get_config;
/// use partycache::MediaCacheConfigExt;
///
/// let cache = get_config().create_media_cache()?;
/// ```
pub trait MediaCacheConfigExt {
    /// Paramètres lus sous `party.cache`
    fn media_cache_settings(&self) -> Result<CacheSettings>;

    /// Crée le cache avec un téléchargeur HTTP
    fn create_media_cache(&self) -> Result<Arc<MediaCache>>;
}

impl MediaCacheConfigExt for Config {
    fn media_cache_settings(&self) -> Result<CacheSettings> {
        let directory = self.get_cache_dir()?;
        let max_bytes = self.get_cache_max_size_mb().saturating_mul(1024 * 1024);
        Ok(CacheSettings::new(directory, max_bytes)
            .with_cooldown(Duration::from_secs(self.get_download_cooldown_secs()))
            .with_queue_capacity(self.get_download_queue_capacity()))
    }

    fn create_media_cache(&self) -> Result<Arc<MediaCache>> {
        let settings = self.media_cache_settings()?;
        let fetcher = Arc::new(HttpFetcher::new()?);
        Ok(MediaCache::new(settings, fetcher)?)
    }
}
