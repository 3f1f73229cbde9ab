//! Extension pour lire les paramètres de la file depuis partyconfig

use partyconfig::Config;
use tracing::warn;

use crate::{DuplicatePolicy, QueueScheduler, QueueSettings};

/// Trait d'extension de `partyconfig::Config` pour la file d'attente
pub trait QueueConfigExt {
    /// Paramètres lus sous `party.queue`
    fn queue_settings(&self) -> QueueSettings;

    fn create_queue_scheduler(&self) -> QueueScheduler {
        QueueScheduler::new(self.queue_settings())
    }
}

impl QueueConfigExt for Config {
    fn queue_settings(&self) -> QueueSettings {
        let raw = self.get_duplicate_policy();
        let duplicate_policy = raw.parse().unwrap_or_else(|e| {
            warn!("{}, falling back to reject_track", e);
            DuplicatePolicy::default()
        });

        QueueSettings {
            max_size: self.get_queue_max_size(),
            history_size: self.get_history_size(),
            duplicate_policy,
            auto_dj: self.get_auto_dj(),
        }
    }
}
