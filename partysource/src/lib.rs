//! # partysource
//!
//! Track model and media source capability for MusicParty.
//!
//! A [`MediaSource`] is an external music platform (or a local catalog) able to
//! search tracks, list playlists and resolve a track id into a playable
//! location. The playback engine only talks to sources through this trait, via a
//! [`SourceRegistry`] keyed by platform name.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use partysource::{CatalogSource, SourceRegistry};
//! use std::sync::Arc;
//!
//! let mut registry = SourceRegistry::new();
//! registry.register(Arc::new(CatalogSource::load("catalog.yaml").await?));
//!
//! let source = registry.get("catalog")?;
//! let playable = source.resolve("track-42").await?;
//! ```

mod catalog;
mod registry;
mod track;

pub use catalog::CatalogSource;
pub use registry::SourceRegistry;
pub use track::{Acquisition, PlayableTrack, Track, TrackKey};

use std::fmt::Debug;

/// Error types for media source operations
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),

    #[error("Source not available: {0}")]
    SourceUnavailable(String),

    #[error("Resolution failed: {0}")]
    Resolution(String),

    #[error("Feature not supported: {0}")]
    NotSupported(String),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for media source operations
pub type Result<T> = std::result::Result<T, SourceError>;

/// Capability of an external music platform
///
/// Implementations must be cheap to share (`Arc<dyn MediaSource>`) and safe to
/// call concurrently. Every call may be slow or fail; callers bound them with
/// their own timeouts.
#[async_trait::async_trait]
pub trait MediaSource: Debug + Send + Sync {
    /// Platform identifier, used as registry key and in [`TrackKey`]
    fn platform(&self) -> &str;

    /// How the audio of this platform is materialised before playback
    fn acquisition(&self) -> Acquisition {
        Acquisition::Direct
    }

    /// Keyword search
    async fn search(&self, keyword: &str) -> Result<Vec<Track>>;

    /// Resolves a track id into metadata plus a playable location
    async fn resolve(&self, track_id: &str) -> Result<PlayableTrack>;

    /// Metadata only lookup
    ///
    /// Defaults to [`MediaSource::resolve`]; sources whose resolution is costly
    /// should override it.
    async fn track(&self, track_id: &str) -> Result<Track> {
        Ok(self.resolve(track_id).await?.track)
    }

    /// Lists a window of a playlist's tracks
    async fn list_playlist(
        &self,
        playlist_id: &str,
        _offset: usize,
        _limit: usize,
    ) -> Result<Vec<Track>> {
        Err(SourceError::NotSupported(format!(
            "playlists on {} ({})",
            self.platform(),
            playlist_id
        )))
    }
}
