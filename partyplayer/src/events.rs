//! Bus d'événements du lecteur
//!
//! Trois familles d'événements, publiées sur un même canal broadcast :
//! l'état complet du lecteur, la vue de la file et les messages système.
//! Aucun abonné n'est requis ; un abonné trop lent perd les plus anciens.

use chrono::{DateTime, Utc};
use partyqueue::QueueEntryView;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::PlayerState;

const EVENT_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Info,
    Warn,
    Error,
    Success,
}

/// Action rapportée par un message système
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerAction {
    Play,
    Pause,
    Resume,
    Skip,
    Add,
    Remove,
    Top,
    ShuffleOn,
    ShuffleOff,
    ImportPlaylist,
    Like,
    Reset,
    ErrorLoad,
    Clear,
    Lock,
}

/// Notification destinée aux clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemMessage {
    pub level: Level,
    pub action: PlayerAction,
    /// Identifiant de l'auteur (`SYSTEM` pour l'administration)
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PartyEvent {
    State(Box<PlayerState>),
    Queue(Vec<QueueEntryView>),
    System(SystemMessage),
}

impl PartyEvent {
    /// Nom de l'événement SSE
    pub fn name(&self) -> &'static str {
        match self {
            PartyEvent::State(_) => "state",
            PartyEvent::Queue(_) => "queue",
            PartyEvent::System(_) => "system",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PartyEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PartyEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: PartyEvent) {
        // pas d'abonné : rien à faire
        let _ = self.tx.send(event);
    }
}
