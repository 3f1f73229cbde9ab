//! # partyplayer - Tête de lecture partagée de la salle d'écoute
//!
//! Le [`PartyController`] est la seule autorité sur « ce qui passe et à quelle
//! position ». Il :
//!
//! - interroge la file ([`partyqueue::QueueScheduler`]) quand rien ne joue ;
//! - résout le titre choisi auprès de sa source (10 s au plus) ;
//! - n'applique le résultat que si aucune autre tentative n'a commencé
//!   entre-temps (compteur de génération) ;
//! - publie un instantané complet après chaque mutation sur un [`EventBus`].
//!
//! Les contrôles partagés (pause, skip, shuffle) passent par un délai global
//! et des verrous posés par l'administrateur ([`AdminConsole`]).
//!
//! ## Exemple
//!
//! ```rust,ignore
//! use partyplayer::{Actor, PartyController, PlayerSettings};
//!
//! let controller = PartyController::new(PlayerSettings::default(), sources, queue, Some(cache));
//! controller.spawn_tasks(shutdown.clone());
//!
//! let alice = Actor::user("u1", "Alice");
//! controller.enqueue(&alice, "catalog", "intro").await?;
//! controller.toggle_shuffle(&alice).await?;
//! ```

pub mod actor;
pub mod admin;
pub mod controller;
pub mod events;
pub mod presence;
pub mod state;

#[cfg(feature = "partyconfig")]
pub mod config_ext;

#[cfg(feature = "partyserver")]
pub mod api;
#[cfg(feature = "partyserver")]
pub mod openapi;

use std::time::Duration;

pub use actor::{Actor, Control, LockTarget, Locks};
pub use admin::{AdminConsole, AdminError, BroadcastSwitch};
pub use controller::{CurrentMedia, PartyController, PlayerSettings, PROXY_STREAM_PATH};
pub use events::{EventBus, Level, PartyEvent, PlayerAction, SystemMessage};
pub use presence::{Presence, PresenceChange};
pub use state::{NowPlaying, PlayerState, Playhead, UserSummary};

#[cfg(feature = "partyconfig")]
pub use config_ext::PlayerConfigExt;

#[cfg(feature = "partyserver")]
pub use api::{create_party_router, PartyPlayerExt};

/// Erreurs du lecteur
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Too many control actions, slow down")]
    RateLimited,

    #[error("{0} is locked by the administrator")]
    Locked(Control),

    #[error("Nothing is playing")]
    NothingPlaying,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Échec de résolution d'un titre choisi pour l'antenne
    #[error("Cannot load {title}: {reason}")]
    Resolution { title: String, reason: String },

    #[error(transparent)]
    Queue(#[from] partyqueue::QueueError),

    #[error(transparent)]
    Source(#[from] partysource::SourceError),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
