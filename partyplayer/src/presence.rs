//! Présence des auditeurs (clients web et flux live).

use std::collections::{BTreeMap, HashSet};

use parking_lot::Mutex;

use crate::state::UserSummary;

#[derive(Debug)]
struct WebUser {
    name: String,
    connections: usize,
}

#[derive(Debug, Default)]
struct PresenceState {
    web: BTreeMap<String, WebUser>,
    stream_listeners: usize,
}

impl PresenceState {
    fn count(&self) -> usize {
        self.web.len() + self.stream_listeners
    }
}

/// Variation du nombre d'auditeurs en ligne
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceChange {
    pub before: usize,
    pub after: usize,
}

impl PresenceChange {
    pub fn became_empty(&self) -> bool {
        self.before > 0 && self.after == 0
    }

    pub fn became_occupied(&self) -> bool {
        self.before == 0 && self.after > 0
    }
}

/// Compte les utilisateurs web distincts (une connexion par onglet) et les
/// auditeurs du flux live
#[derive(Debug, Default)]
pub struct Presence {
    state: Mutex<PresenceState>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_joined(&self, id: &str, name: &str) -> PresenceChange {
        let mut state = self.state.lock();
        let before = state.count();
        let user = state.web.entry(id.to_string()).or_insert_with(|| WebUser {
            name: name.to_string(),
            connections: 0,
        });
        user.connections += 1;
        user.name = name.to_string();
        PresenceChange {
            before,
            after: state.count(),
        }
    }

    pub fn user_left(&self, id: &str) -> PresenceChange {
        let mut state = self.state.lock();
        let before = state.count();
        let gone = match state.web.get_mut(id) {
            Some(user) => {
                user.connections = user.connections.saturating_sub(1);
                user.connections == 0
            }
            None => false,
        };
        if gone {
            state.web.remove(id);
        }
        PresenceChange {
            before,
            after: state.count(),
        }
    }

    pub fn set_stream_listeners(&self, listeners: usize) -> PresenceChange {
        let mut state = self.state.lock();
        let before = state.count();
        state.stream_listeners = listeners;
        PresenceChange {
            before,
            after: state.count(),
        }
    }

    pub fn online_count(&self) -> usize {
        self.state.lock().count()
    }

    pub fn stream_listeners(&self) -> usize {
        self.state.lock().stream_listeners
    }

    pub fn online_ids(&self) -> HashSet<String> {
        self.state.lock().web.keys().cloned().collect()
    }

    pub fn users(&self) -> Vec<UserSummary> {
        self.state
            .lock()
            .web
            .iter()
            .map(|(id, u)| UserSummary {
                id: id.clone(),
                name: u.name.clone(),
            })
            .collect()
    }
}
