//! Source backed by a YAML catalog file.
//!
//! ```yaml
//! platform: catalog
//! acquisition: cached
//! tracks:
//!   - id: intro
//!     title: Intro
//!     artists: [The Band]
//!     duration_ms: 183000
//!     url: https://cdn.example/intro.mp3
//!     headers:
//!       Referer: https://example/
//! playlists:
//!   warmup: [intro]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::{Acquisition, MediaSource, PlayableTrack, Result, SourceError, Track};

const DEFAULT_PLATFORM: &str = "catalog";

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_platform")]
    platform: String,
    #[serde(default)]
    acquisition: Acquisition,
    #[serde(default)]
    tracks: Vec<CatalogTrack>,
    #[serde(default)]
    playlists: BTreeMap<String, Vec<String>>,
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogTrack {
    id: String,
    title: String,
    #[serde(default)]
    artists: Vec<String>,
    #[serde(default)]
    duration_ms: u64,
    url: String,
    #[serde(default)]
    cover_url: Option<String>,
    #[serde(default)]
    needs_proxy: bool,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// Media source listing the tracks of a YAML file
#[derive(Debug)]
pub struct CatalogSource {
    platform: String,
    acquisition: Acquisition,
    tracks: Vec<CatalogTrack>,
    index: HashMap<String, usize>,
    playlists: BTreeMap<String, Vec<String>>,
}

impl CatalogSource {
    /// Charge un catalogue depuis un fichier YAML
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let catalog = Self::from_yaml_str(&content)?;
        info!(
            path = %path.display(),
            platform = %catalog.platform,
            tracks = catalog.tracks.len(),
            playlists = catalog.playlists.len(),
            "Loaded track catalog"
        );
        Ok(catalog)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(content)?;

        let mut tracks = Vec::with_capacity(file.tracks.len());
        let mut index = HashMap::with_capacity(file.tracks.len());
        for track in file.tracks {
            if index.contains_key(&track.id) {
                tracing::warn!(id = %track.id, "Duplicate catalog entry ignored");
                continue;
            }
            index.insert(track.id.clone(), tracks.len());
            tracks.push(track);
        }

        Ok(Self {
            platform: file.platform,
            acquisition: file.acquisition,
            tracks,
            index,
            playlists: file.playlists,
        })
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn to_track(&self, entry: &CatalogTrack) -> Track {
        Track {
            id: entry.id.clone(),
            title: entry.title.clone(),
            artists: entry.artists.clone(),
            duration_ms: entry.duration_ms,
            platform: self.platform.clone(),
            cover_url: entry.cover_url.clone(),
        }
    }

    fn entry(&self, track_id: &str) -> Result<&CatalogTrack> {
        self.index
            .get(track_id)
            .map(|&i| &self.tracks[i])
            .ok_or_else(|| SourceError::TrackNotFound(track_id.to_string()))
    }
}

#[async_trait::async_trait]
impl MediaSource for CatalogSource {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn acquisition(&self) -> Acquisition {
        self.acquisition
    }

    async fn search(&self, keyword: &str) -> Result<Vec<Track>> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .tracks
            .iter()
            .filter(|t| {
                t.title.to_lowercase().contains(&needle)
                    || t.artists.iter().any(|a| a.to_lowercase().contains(&needle))
            })
            .map(|t| self.to_track(t))
            .collect())
    }

    async fn resolve(&self, track_id: &str) -> Result<PlayableTrack> {
        let entry = self.entry(track_id)?;
        let mut playable =
            PlayableTrack::new(self.to_track(entry), entry.url.clone()).with_proxy(entry.needs_proxy);
        for (name, value) in &entry.headers {
            playable = playable.with_header(name.clone(), value.clone());
        }
        Ok(playable)
    }

    async fn track(&self, track_id: &str) -> Result<Track> {
        Ok(self.to_track(self.entry(track_id)?))
    }

    async fn list_playlist(
        &self,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Track>> {
        let ids = self
            .playlists
            .get(playlist_id)
            .ok_or_else(|| SourceError::PlaylistNotFound(playlist_id.to_string()))?;

        Ok(ids
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| self.entry(id).ok())
            .map(|t| self.to_track(t))
            .collect())
    }
}

#[cfg(feature = "partyconfig")]
impl CatalogSource {
    /// Charge le catalogue désigné par `sources.catalog.path`
    pub async fn from_config() -> Result<Self> {
        let path = partyconfig::get_config().get_catalog_path();
        Self::load(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
platform: demo
acquisition: cached
tracks:
  - id: a
    title: Morning Light
    artists: [Nova]
    duration_ms: 1000
    url: https://cdn.example/a.mp3
  - id: b
    title: Night Drive
    artists: [Kite, Nova]
    duration_ms: 2000
    url: https://cdn.example/b
    needs_proxy: true
    headers:
      Referer: https://example.org/
  - id: a
    title: duplicate
    url: https://cdn.example/dup.mp3
playlists:
  mix: [a, b, missing]
"#;

    #[tokio::test]
    async fn search_matches_title_and_artist_case_insensitively() {
        let catalog = CatalogSource::from_yaml_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);

        let hits = catalog.search("NOVA").await.unwrap();
        assert_eq!(hits.len(), 2);
        let hits = catalog.search("drive").await.unwrap();
        assert_eq!(hits[0].id, "b");
        assert!(catalog.search("  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_carries_headers_and_proxy_flag() {
        let catalog = CatalogSource::from_yaml_str(CATALOG).unwrap();
        let playable = catalog.resolve("b").await.unwrap();

        assert!(playable.needs_proxy);
        assert_eq!(playable.track.platform, "demo");
        assert_eq!(
            playable.headers,
            vec![("Referer".to_string(), "https://example.org/".to_string())]
        );
        assert_eq!(catalog.acquisition(), Acquisition::Cached);

        let err = catalog.resolve("zzz").await.unwrap_err();
        assert!(matches!(err, SourceError::TrackNotFound(_)));
    }

    #[tokio::test]
    async fn playlist_window_skips_unknown_ids() {
        let catalog = CatalogSource::from_yaml_str(CATALOG).unwrap();

        let all = catalog.list_playlist("mix", 0, 100).await.unwrap();
        assert_eq!(all.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let tail = catalog.list_playlist("mix", 1, 1).await.unwrap();
        assert_eq!(tail[0].id, "b");

        assert!(matches!(
            catalog.list_playlist("nope", 0, 10).await,
            Err(SourceError::PlaylistNotFound(_))
        ));
    }

    #[tokio::test]
    async fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, CATALOG).unwrap();

        let catalog = CatalogSource::load(&path).await.unwrap();
        assert_eq!(catalog.platform(), "demo");
    }
}
