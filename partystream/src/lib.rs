//! # partystream - Proxy de plages et diffusion live
//!
//! Deux services indépendants, tous deux pilotés par le
//! [`partyplayer::PartyController`] :
//!
//! - [`ProxyStreamer`] : met en mémoire le titre en cours pour les sources
//!   qui exigent des en-têtes particuliers, et le sert par plages d'octets
//!   (`GET /proxy/stream`) dès que la taille est connue ;
//! - [`LiveBroadcast`] : un processus ffmpeg suit la tête de lecture et son
//!   flux MP3 est recopié vers chaque auditeur (`GET /radio/stream?key=`),
//!   l'accès étant contrôlé par des jetons ([`StreamTokens`]).
//!
//! ## Exemple
//!
//! ```rust,ignore
//! use partystream::{LiveBroadcast, ProxyStreamer, StreamTokens};
//!
//! let proxy = ProxyStreamer::new(ProxySettings::default())?;
//! proxy.spawn_binder(controller.clone(), shutdown.clone());
//!
//! let live = LiveBroadcast::new(TranscoderSettings::default(), controller.clone());
//! live.spawn(shutdown.clone());
//! ```

pub mod broadcaster;
pub mod proxy;
pub mod tokens;
pub mod transcoder;

#[cfg(feature = "partyconfig")]
pub mod config_ext;

#[cfg(feature = "partyserver")]
pub mod server_ext;

pub use broadcaster::{Broadcaster, ListenerId};
pub use proxy::{ProxySettings, ProxySnapshot, ProxyStatus, ProxyStreamer};
pub use tokens::{StreamTokens, TokenSettings};
pub use transcoder::{ffmpeg_args, LiveBroadcast, MediaInput, TranscoderSettings};

#[cfg(feature = "partyconfig")]
pub use config_ext::StreamConfigExt;

#[cfg(feature = "partyserver")]
pub use server_ext::PartyStreamExt;

/// Erreurs du proxy de plages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid proxy target: {0}")]
    InvalidUrl(String),

    #[error("Upstream did not declare a content length")]
    MissingLength,

    #[error("Upstream content too large: {length} bytes (max {max})")]
    TooLarge { length: u64, max: u64 },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Proxy session was cancelled")]
    Cancelled,
}

/// Erreurs de la diffusion live
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Live broadcast is disabled")]
    Disabled,

    #[error("Invalid or expired stream key")]
    InvalidToken,

    #[error("Cannot start transcoder: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;
