//! Jetons d'accès au flux live
//!
//! Un jeton par utilisateur : en générer un nouveau révoque les précédents.
//! Un jeton expire 24 h après sa création ou après 4 h sans utilisation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Durée de vie absolue
    pub ttl: Duration,
    /// Durée maximale sans utilisation
    pub idle: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            idle: Duration::from_secs(4 * 3600),
        }
    }
}

#[derive(Debug)]
struct TokenInfo {
    user_id: String,
    created_at: Instant,
    last_access: Instant,
}

#[derive(Debug, Default)]
pub struct StreamTokens {
    settings: TokenSettings,
    tokens: Mutex<HashMap<String, TokenInfo>>,
}

impl StreamTokens {
    pub fn new(settings: TokenSettings) -> Self {
        Self {
            settings,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Crée un jeton pour l'utilisateur et révoque ses jetons précédents
    pub fn generate(&self, user_id: &str) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();

        let mut tokens = self.tokens.lock();
        tokens.retain(|_, info| info.user_id != user_id);
        tokens.insert(
            token.clone(),
            TokenInfo {
                user_id: user_id.to_string(),
                created_at: now,
                last_access: now,
            },
        );
        debug!(user = %user_id, "Stream token issued");
        token
    }

    /// Vérifie un jeton et rafraîchit sa date de dernier accès
    pub fn validate(&self, token: &str) -> bool {
        let now = Instant::now();
        let mut tokens = self.tokens.lock();
        let Some(info) = tokens.get_mut(token) else {
            return false;
        };
        if self.is_expired(info, now) {
            tokens.remove(token);
            return false;
        }
        info.last_access = now;
        true
    }

    /// Identifiant de l'utilisateur propriétaire d'un jeton valide
    pub fn owner(&self, token: &str) -> Option<String> {
        let now = Instant::now();
        let tokens = self.tokens.lock();
        tokens
            .get(token)
            .filter(|info| !self.is_expired(info, now))
            .map(|info| info.user_id.clone())
    }

    fn is_expired(&self, info: &TokenInfo, now: Instant) -> bool {
        now.duration_since(info.created_at) >= self.settings.ttl
            || now.duration_since(info.last_access) >= self.settings.idle
    }

    /// Supprime les jetons expirés et retourne leur nombre
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, info| !self.is_expired(info, now));
        before - tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    /// Nettoyage horaire jusqu'à l'arrêt
    pub fn spawn_cleanup(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = this.cleanup();
                        if removed > 0 {
                            info!(removed, "Expired stream tokens removed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_new_token_revokes_previous() {
        let tokens = StreamTokens::new(TokenSettings::default());
        let first = tokens.generate("u1");
        let other = tokens.generate("u2");
        let second = tokens.generate("u1");

        assert_ne!(first, second);
        assert!(!tokens.validate(&first));
        assert!(tokens.validate(&second));
        assert!(tokens.validate(&other));
        assert_eq!(tokens.owner(&second).as_deref(), Some("u1"));
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_expiry_is_refreshed_by_use() {
        let tokens = StreamTokens::new(TokenSettings::default());
        let t = tokens.generate("u1");

        tokio::time::advance(Duration::from_secs(3 * 3600)).await;
        assert!(tokens.validate(&t));
        tokio::time::advance(Duration::from_secs(3 * 3600)).await;
        assert!(tokens.validate(&t));
        tokio::time::advance(Duration::from_secs(4 * 3600 + 1)).await;
        assert!(!tokens.validate(&t));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absolute_expiry() {
        let tokens = StreamTokens::new(TokenSettings::default());
        let t = tokens.generate("u1");
        for _ in 0..8 {
            tokio::time::advance(Duration::from_secs(3 * 3600)).await;
            if !tokens.validate(&t) {
                break;
            }
        }
        assert!(!tokens.validate(&t));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_counts_expired() {
        let tokens = StreamTokens::new(TokenSettings::default());
        tokens.generate("u1");
        tokens.generate("u2");
        assert_eq!(tokens.cleanup(), 0);

        tokio::time::advance(Duration::from_secs(5 * 3600)).await;
        assert_eq!(tokens.cleanup(), 2);
        assert!(tokens.is_empty());
    }
}
