//! Tête de lecture et instantanés publiés.

use partyqueue::{QueueEntryView, Submitter};
use partysource::Track;
use serde::Serialize;
use tokio::time::Instant;

use crate::actor::Locks;

/// Position dérivée d'une ancre
///
/// En lecture, `position = anchor + (now - anchor_at)`. La pause fige
/// l'ancre sur la position courante ; la reprise repart de `now`.
#[derive(Debug, Clone)]
pub struct Playhead {
    anchor_ms: u64,
    anchor_at: Instant,
    paused: bool,
    paused_at: Option<Instant>,
    /// Pause déclenchée par le départ du dernier auditeur
    idle_pause: bool,
}

impl Playhead {
    pub fn start(now: Instant) -> Self {
        Self {
            anchor_ms: 0,
            anchor_at: now,
            paused: false,
            paused_at: None,
            idle_pause: false,
        }
    }

    pub fn position_ms(&self, now: Instant) -> u64 {
        if self.paused {
            self.anchor_ms
        } else {
            let elapsed = now.saturating_duration_since(self.anchor_at).as_millis() as u64;
            self.anchor_ms.saturating_add(elapsed)
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_idle_pause(&self) -> bool {
        self.paused && self.idle_pause
    }

    pub fn paused_at(&self) -> Option<Instant> {
        self.paused_at
    }

    /// Retourne `false` si la tête était déjà en pause
    pub fn pause(&mut self, now: Instant, idle: bool) -> bool {
        if self.paused {
            return false;
        }
        self.anchor_ms = self.position_ms(now);
        self.paused = true;
        self.paused_at = Some(now);
        self.idle_pause = idle;
        true
    }

    /// Retourne `false` si la tête n'était pas en pause
    pub fn resume(&mut self, now: Instant) -> bool {
        if !self.paused {
            return false;
        }
        self.anchor_at = now;
        self.paused = false;
        self.paused_at = None;
        self.idle_pause = false;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
}

impl From<Submitter> for UserSummary {
    fn from(s: Submitter) -> Self {
        Self {
            id: s.id,
            name: s.name,
        }
    }
}

/// Titre en cours, tel que vu par les clients
///
/// Les clients calculent la position courante à partir du triplet
/// (`position_ms`, `anchor_timestamp_ms`, `paused`) sans interroger le serveur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NowPlaying {
    pub track: Track,
    pub media_url: String,
    pub submitter: Submitter,
    pub auto_dj: bool,
    pub position_ms: u64,
    /// Horodatage (ms epoch) auquel `position_ms` a été calculée
    pub anchor_timestamp_ms: i64,
    pub paused: bool,
    pub liked_by: Vec<String>,
    /// Positions (ms) auxquelles les likes ont été donnés
    pub like_markers: Vec<u64>,
}

/// Instantané complet du lecteur
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerState {
    pub now_playing: Option<NowPlaying>,
    pub queue: Vec<QueueEntryView>,
    pub shuffle: bool,
    pub paused: bool,
    /// Chargement en cours et rien à l'antenne
    pub loading: bool,
    pub online_users: Vec<UserSummary>,
    pub stream_listeners: usize,
    pub online_count: usize,
    pub locks: Locks,
    pub generation: u64,
    pub server_time_ms: i64,
}
