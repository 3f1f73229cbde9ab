//! # partyqueue - File d'attente partagée de la salle d'écoute
//!
//! Cette crate tient les soumissions en attente et choisit la prochaine à
//! jouer selon des règles d'équité et de priorité :
//!
//! 1. les entrées en **tête globale** passent d'abord, dans l'ordre d'arrivée ;
//! 2. sans shuffle, l'ordre physique de la file ;
//! 3. avec shuffle, un **round robin** entre soumetteurs (en ligne d'abord),
//!    la tête personnelle du soumetteur choisi passant avant ses autres titres.
//!
//! Seules les entrées READY ou FAILED sont sélectionnables. Une entrée FAILED
//! est renvoyée sans être retirée : c'est à l'appelant de la supprimer puis de
//! redemander un candidat.
//!
//! ## Exemple
//!
//! ```rust
//! use std::collections::HashSet;
//! use partyqueue::{PollContext, QueueEntry, QueueScheduler, QueueSettings, Readiness, Submitter};
//! use partysource::Track;
//!
//! let queue = QueueScheduler::new(QueueSettings::default());
//! let track = Track {
//!     id: "42".into(),
//!     title: "So What".into(),
//!     artists: vec!["Miles Davis".into()],
//!     duration_ms: 545_000,
//!     platform: "catalog".into(),
//!     cover_url: None,
//! };
//! queue.add(QueueEntry::new(track, Submitter::new("u1", "Alice"), Readiness::Ready)).unwrap();
//!
//! let online = HashSet::new();
//! let next = queue.poll_next(&PollContext::new(false, &online, true)).unwrap();
//! assert_eq!(next.track.id, "42");
//! assert!(queue.is_empty());
//! ```

pub mod entry;
pub mod scheduler;

#[cfg(feature = "partyconfig")]
pub mod config_ext;

pub use entry::{
    strip_priority_prefix, Priority, PromoteOutcome, QueueEntry, QueueEntryView, Readiness,
    Submitter, GLOBAL_TOP_PREFIX, PERSONAL_TOP_PREFIX, SYSTEM_SUBMITTER_ID,
};
pub use scheduler::{DuplicatePolicy, PollContext, QueueScheduler, QueueSettings};

#[cfg(feature = "partyconfig")]
pub use config_ext::QueueConfigExt;

/// Erreurs de la file d'attente
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full ({max} entries)")]
    CapacityExceeded { max: usize },

    #[error("Track already queued: {0}")]
    Duplicate(String),

    #[error("Queue entry not found: {0}")]
    NotFound(String),

    #[error("Unknown duplicate policy: {0}")]
    InvalidPolicy(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;
