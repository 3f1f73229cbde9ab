//! Extension pour lire les réglages du lecteur depuis partyconfig

use std::time::Duration;

use partyconfig::Config;

use crate::PlayerSettings;

/// Trait d'extension de `partyconfig::Config` pour le lecteur
pub trait PlayerConfigExt {
    /// Réglages lus sous `party.player`
    fn player_settings(&self) -> PlayerSettings;
}

impl PlayerConfigExt for Config {
    fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            tick_interval: Duration::from_millis(self.get_tick_interval_ms().max(50)),
            control_cooldown: Duration::from_millis(self.get_control_cooldown_ms()),
            resolve_timeout: Duration::from_secs(self.get_resolve_timeout_secs().max(1)),
            idle_reset_timeout: Duration::from_secs(self.get_idle_reset_timeout_secs()),
            idle_check_interval: Duration::from_secs(self.get_idle_check_interval_secs().max(1)),
            playlist_import_limit: self.get_playlist_import_limit(),
        }
    }
}
