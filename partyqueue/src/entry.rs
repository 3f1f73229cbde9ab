use chrono::{DateTime, Utc};
use partysource::{Track, TrackKey};
use serde::{Deserialize, Serialize};

/// Préfixe d'identifiant d'une entrée en tête globale
pub const GLOBAL_TOP_PREFIX: &str = "TOP-";
/// Préfixe d'identifiant d'une entrée en tête personnelle
pub const PERSONAL_TOP_PREFIX: &str = "USERTOP-";

/// Identifiant du soumetteur synthétique de l'auto-DJ
pub const SYSTEM_SUBMITTER_ID: &str = "SYSTEM";
const SYSTEM_SUBMITTER_NAME: &str = "AutoDJ";

/// Niveau de priorité d'une entrée
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    #[default]
    Normal,
    PersonalTop,
    GlobalTop,
}

/// Disponibilité de l'audio d'une entrée
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Readiness {
    #[default]
    Pending,
    Downloading,
    Ready,
    Failed,
}

impl Readiness {
    /// Seules les entrées READY ou FAILED sont sélectionnables
    pub fn is_candidate(self) -> bool {
        matches!(self, Readiness::Ready | Readiness::Failed)
    }
}

/// Auteur d'une soumission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Submitter {
    pub id: String,
    pub name: String,
}

impl Submitter {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_SUBMITTER_ID, SYSTEM_SUBMITTER_NAME)
    }

    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_SUBMITTER_ID
    }
}

/// Une soumission dans la file partagée
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub entry_id: String,
    pub track: Track,
    pub submitter: Submitter,
    pub priority: Priority,
    pub readiness: Readiness,
    pub enqueued_at: DateTime<Utc>,
    /// Entrée synthétisée depuis l'historique, jamais insérée dans la file
    #[serde(default)]
    pub auto_dj: bool,
}

impl QueueEntry {
    pub fn new(track: Track, submitter: Submitter, readiness: Readiness) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().to_string(),
            track,
            submitter,
            priority: Priority::Normal,
            readiness,
            enqueued_at: Utc::now(),
            auto_dj: false,
        }
    }

    pub fn key(&self) -> TrackKey {
        self.track.key()
    }

    pub fn is_candidate(&self) -> bool {
        self.readiness.is_candidate()
    }

    /// Identifiant exposé aux clients, préfixé selon la priorité
    pub fn queue_id(&self) -> String {
        match self.priority {
            Priority::Normal => self.entry_id.clone(),
            Priority::PersonalTop => format!("{}{}", PERSONAL_TOP_PREFIX, self.entry_id),
            Priority::GlobalTop => format!("{}{}", GLOBAL_TOP_PREFIX, self.entry_id),
        }
    }

    pub fn view(&self) -> QueueEntryView {
        QueueEntryView {
            queue_id: self.queue_id(),
            track: self.track.clone(),
            submitter: self.submitter.clone(),
            priority: self.priority,
            readiness: self.readiness,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Retire un éventuel préfixe de priorité d'un identifiant d'entrée
pub fn strip_priority_prefix(id: &str) -> &str {
    id.strip_prefix(PERSONAL_TOP_PREFIX)
        .or_else(|| id.strip_prefix(GLOBAL_TOP_PREFIX))
        .unwrap_or(id)
}

/// Vue publiée d'une entrée
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntryView {
    pub queue_id: String,
    pub track: Track,
    pub submitter: Submitter,
    pub priority: Priority,
    pub readiness: Readiness,
    pub enqueued_at: DateTime<Utc>,
}

/// Résultat d'une promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromoteOutcome {
    /// Passée en tête personnelle, sur place
    PersonalTop,
    /// Déplacée en tête globale
    GlobalTop,
    /// Déjà en tête globale
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> QueueEntry {
        QueueEntry::new(
            Track {
                id: "t".into(),
                title: "Title".into(),
                artists: vec![],
                duration_ms: 0,
                platform: "demo".into(),
                cover_url: None,
            },
            Submitter::new("u1", "Alice"),
            Readiness::Ready,
        )
    }

    #[test]
    fn queue_id_reflects_priority_and_strips_back() {
        let mut e = entry();
        let raw = e.entry_id.clone();
        assert_eq!(e.queue_id(), raw);

        e.priority = Priority::PersonalTop;
        assert_eq!(e.queue_id(), format!("USERTOP-{raw}"));
        assert_eq!(strip_priority_prefix(&e.queue_id()), raw);

        e.priority = Priority::GlobalTop;
        assert_eq!(e.queue_id(), format!("TOP-{raw}"));
        assert_eq!(strip_priority_prefix(&e.queue_id()), raw);
    }

    #[test]
    fn only_ready_and_failed_are_candidates() {
        assert!(Readiness::Ready.is_candidate());
        assert!(Readiness::Failed.is_candidate());
        assert!(!Readiness::Pending.is_candidate());
        assert!(!Readiness::Downloading.is_candidate());
    }
}
