use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable song metadata, shared by value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    /// Durée en millisecondes, 0 si inconnue
    #[serde(default)]
    pub duration_ms: u64,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

impl Track {
    pub fn key(&self) -> TrackKey {
        TrackKey::new(&self.platform, &self.id)
    }

    /// Artistes joints par ", "
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// Identity of a track across platforms
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub platform: String,
    pub id: String,
}

impl TrackKey {
    pub fn new(platform: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            id: id.into(),
        }
    }

    /// Identifiant utilisable comme nom de fichier dans le cache média
    ///
    /// Seuls `[A-Za-z0-9_-]` sont conservés, le reste devient `_`.
    pub fn cache_id(&self) -> String {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        };
        format!("{}-{}", sanitize(&self.platform), sanitize(&self.id))
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.id)
    }
}

/// How a platform's audio becomes playable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Acquisition {
    /// Le flux distant est lu tel quel
    #[default]
    Direct,
    /// Le fichier doit d'abord être téléchargé dans le cache média
    Cached,
}

/// A resolved track: metadata plus where and how to fetch its audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayableTrack {
    pub track: Track,
    pub url: String,
    /// The upstream must be range-served through the proxy
    pub needs_proxy: bool,
    /// Headers the upstream expects (Referer, User-Agent...)
    pub headers: Vec<(String, String)>,
    /// File extension used when the audio is cached
    pub extension: String,
}

impl PlayableTrack {
    pub fn new(track: Track, url: impl Into<String>) -> Self {
        let url = url.into();
        let extension = guess_extension(&url);
        Self {
            track,
            url,
            needs_proxy: false,
            headers: Vec::new(),
            extension,
        }
    }

    pub fn with_proxy(mut self, needs_proxy: bool) -> Self {
        self.needs_proxy = needs_proxy;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

fn guess_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "m4a".to_string())
}
