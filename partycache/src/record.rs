use chrono::{DateTime, Utc};
use serde::Serialize;

/// État d'une entrée du cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    Pending,
    Downloading,
    Ready,
    Failed,
}

/// Matérialisation locale d'une piste
#[derive(Debug, Clone, Serialize)]
pub struct CacheRecord {
    pub id: String,
    pub file_name: String,
    pub status: CacheStatus,
    /// Taille en octets, 0 tant que le fichier n'est pas complet
    pub size: u64,
    pub last_access: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) access_seq: u64,
}

impl CacheRecord {
    pub(crate) fn pending(id: &str, extension: &str, seq: u64) -> Self {
        Self {
            id: id.to_string(),
            file_name: file_name_for(id, extension),
            status: CacheStatus::Pending,
            size: 0,
            last_access: Utc::now(),
            access_seq: seq,
        }
    }

    pub(crate) fn touch(&mut self, seq: u64) {
        self.last_access = Utc::now();
        self.access_seq = seq;
    }
}

/// Notification émise après chaque transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Status { id: String, status: CacheStatus },
    /// L'entrée a été évincée ou supprimée explicitement
    Removed { id: String },
}

impl CacheEvent {
    pub fn id(&self) -> &str {
        match self {
            CacheEvent::Status { id, .. } | CacheEvent::Removed { id } => id,
        }
    }
}

pub(crate) fn file_name_for(id: &str, extension: &str) -> String {
    let ext = extension.trim_start_matches('.');
    if ext.is_empty() {
        id.to_string()
    } else {
        format!("{}.{}", id, ext)
    }
}

/// Identifiant d'une entrée à partir de son nom de fichier
pub(crate) fn id_from_file_name(file_name: &str) -> &str {
    file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(file_name)
}
