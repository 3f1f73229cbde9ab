//! Console d'administration
//!
//! Les commandes sont des lignes préfixées par `//`, insensibles à la casse :
//!
//! | Commande                       | Effet                                   |
//! |--------------------------------|-----------------------------------------|
//! | `//STREAM ON\|OFF`             | active / coupe la diffusion live        |
//! | `//LOCK PAUSE\|SKIP\|SHUFFLE\|ALL ON\|OFF` | pose / lève un verrou       |
//! | `//PAUSE`, `//SKIP`, `//SHUFFLE` | contrôle en tant que système          |
//! | `//CLEAR [QUEUE]`              | vide la file                            |
//! | `//RESET`                      | remise à zéro complète                  |

use std::sync::Arc;

use tracing::{info, warn};

use crate::actor::{Actor, LockTarget};
use crate::controller::PartyController;
use crate::PlayerError;

/// Interrupteur de la diffusion live
pub trait BroadcastSwitch: Send + Sync {
    fn set_enabled(&self, enabled: bool) -> anyhow::Result<()>;
    fn is_enabled(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Wrong admin password")]
    Forbidden,

    #[error("Usage: {0}")]
    Usage(String),

    #[error(transparent)]
    Player(#[from] PlayerError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[source] anyhow::Error),
}

pub struct AdminConsole {
    controller: Arc<PartyController>,
    password: String,
    broadcast: Option<Arc<dyn BroadcastSwitch>>,
}

impl std::fmt::Debug for AdminConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConsole")
            .field("broadcast", &self.broadcast.is_some())
            .finish_non_exhaustive()
    }
}

fn parse_switch(word: Option<&str>, usage: &str) -> Result<bool, AdminError> {
    match word.map(str::to_ascii_uppercase).as_deref() {
        Some("ON") => Ok(true),
        Some("OFF") => Ok(false),
        _ => Err(AdminError::Usage(usage.to_string())),
    }
}

impl AdminConsole {
    pub fn new(controller: Arc<PartyController>, password: impl Into<String>) -> Self {
        Self {
            controller,
            password: password.into(),
            broadcast: None,
        }
    }

    pub fn with_broadcast(mut self, switch: Arc<dyn BroadcastSwitch>) -> Self {
        self.broadcast = Some(switch);
        self
    }

    /// Exécute une commande et retourne un compte rendu lisible
    pub async fn execute(&self, password: &str, command: &str) -> Result<String, AdminError> {
        if self.password.is_empty() || password != self.password {
            warn!("Rejected admin command with bad password");
            return Err(AdminError::Forbidden);
        }

        let line = command.trim();
        let Some(body) = line.strip_prefix("//") else {
            return Err(AdminError::Usage("commands start with //".to_string()));
        };
        let mut words = body.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_uppercase();
        info!(command = %line, "Admin command");

        let controller = &self.controller;
        match verb.as_str() {
            "STREAM" => {
                let enabled = parse_switch(words.next(), "//STREAM ON|OFF")?;
                let switch = self
                    .broadcast
                    .as_ref()
                    .ok_or_else(|| AdminError::Usage("live broadcast is not available".into()))?;
                switch.set_enabled(enabled).map_err(AdminError::Broadcast)?;
                Ok(format!("Live stream {}", if enabled { "on" } else { "off" }))
            }
            "LOCK" => {
                let usage = "//LOCK PAUSE|SKIP|SHUFFLE|ALL ON|OFF";
                let target: LockTarget = words
                    .next()
                    .ok_or_else(|| AdminError::Usage(usage.into()))?
                    .parse()
                    .map_err(|_| AdminError::Usage(usage.into()))?;
                let locked = parse_switch(words.next(), usage)?;
                controller.set_lock(target, locked);
                Ok(format!("{} {}", target, if locked { "locked" } else { "unlocked" }))
            }
            "PAUSE" => match controller.toggle_pause(&Actor::System).await? {
                Some(true) => Ok("Paused".to_string()),
                Some(false) => Ok("Resumed".to_string()),
                None => Ok("Nothing was playing".to_string()),
            },
            "SKIP" => {
                controller.skip(&Actor::System).await?;
                Ok("Skipped".to_string())
            }
            "SHUFFLE" => {
                let on = controller.toggle_shuffle(&Actor::System).await?;
                Ok(format!("Shuffle {}", if on { "on" } else { "off" }))
            }
            "CLEAR" => {
                let cleared = controller.clear_queue();
                Ok(format!("{} entries removed", cleared))
            }
            "RESET" => {
                controller.reset();
                Ok("Party reset".to_string())
            }
            other => Err(AdminError::Usage(format!("unknown command {}", other))),
        }
    }
}
