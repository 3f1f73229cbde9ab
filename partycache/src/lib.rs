//! # partycache - Cache média local avec éviction LRU
//!
//! Télécharge et conserve localement l'audio des plateformes qui ne peuvent pas
//! être lues directement depuis leur URL.
//!
//! ## Fonctionnement
//!
//! - Les demandes de téléchargement passent par un tampon borné ; un unique
//!   worker les traite une par une avec une pause fixe entre deux tâches.
//! - Chaque identifiant suit `PENDING → DOWNLOADING → READY | FAILED`.
//! - Après chaque téléchargement, les entrées READY les moins récemment
//!   utilisées sont supprimées tant que la taille totale dépasse la limite.
//! - Chaque transition est publiée sur un canal [`CacheEvent`].
//!
//! ## Exemple
//!
//! ```rust,ignore
//! use partycache::{CacheSettings, DownloadRequest, HttpFetcher, MediaCache};
//! use std::sync::Arc;
//!
//! let cache = MediaCache::new(CacheSettings::new("/tmp/media", 1 << 30), Arc::new(HttpFetcher::new()?))?;
//! cache.spawn_worker(shutdown.clone());
//!
//! cache.submit(DownloadRequest::from_url("demo-42", "mp3", "https://cdn.example/42.mp3"));
//! ```

pub mod cache;
pub mod download;
pub mod record;

#[cfg(feature = "partyconfig")]
pub mod config_ext;

#[cfg(feature = "partyserver")]
pub mod server_ext;

pub use cache::{CacheSettings, MediaCache, MEDIA_ROUTE};
pub use download::{DownloadRequest, DownloadTarget, Fetcher, HttpFetcher};
pub use record::{CacheEvent, CacheRecord, CacheStatus};

#[cfg(feature = "partyconfig")]
pub use config_ext::MediaCacheConfigExt;

#[cfg(feature = "partyserver")]
pub use server_ext::MediaCacheExt;

/// Erreurs du cache média
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Download failed: {0}")]
    Download(String),

    #[error("Download queue is full")]
    QueueFull,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
