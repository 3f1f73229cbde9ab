//! Recopie d'un flux d'octets vers un ensemble d'auditeurs
//!
//! Chaque auditeur possède un canal borné. Un auditeur trop lent perd des
//! morceaux plutôt que de ralentir les autres ; un auditeur dont le canal est
//! fermé est retiré.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

/// Nombre de morceaux en attente par auditeur
pub const LISTENER_CAPACITY: usize = 64;

pub type ListenerId = u64;

#[derive(Debug)]
struct Listener {
    tx: mpsc::Sender<Bytes>,
    remote: String,
}

#[derive(Debug, Default)]
pub struct Broadcaster {
    listeners: Mutex<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un auditeur et retourne le nouveau nombre d'auditeurs
    pub fn add_listener(
        &self,
        remote: impl Into<String>,
    ) -> (ListenerId, mpsc::Receiver<Bytes>, usize) {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let remote = remote.into();

        let mut listeners = self.listeners.lock();
        listeners.insert(id, Listener { tx, remote: remote.clone() });
        let count = listeners.len();
        info!(remote = %remote, listeners = count, "Stream listener connected");
        (id, rx, count)
    }

    pub fn remove_listener(&self, id: ListenerId) -> usize {
        let mut listeners = self.listeners.lock();
        if let Some(l) = listeners.remove(&id) {
            info!(remote = %l.remote, listeners = listeners.len(), "Stream listener disconnected");
        }
        listeners.len()
    }

    pub fn count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Ferme le canal de tous les auditeurs
    pub fn disconnect_all(&self) -> usize {
        let mut listeners = self.listeners.lock();
        let n = listeners.len();
        listeners.clear();
        if n > 0 {
            info!(listeners = n, "All stream listeners disconnected");
        }
        n
    }

    /// Envoie un morceau à chaque auditeur sans jamais attendre
    ///
    /// Retourne le nombre d'auditeurs restants.
    pub fn broadcast(&self, chunk: &Bytes) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|id, l| match l.tx.try_send(chunk.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(listener = id, "Listener lagging, chunk dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(listener = id, remote = %l.remote, "Listener gone");
                false
            }
        });
        listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_every_listener() {
        let b = Broadcaster::new();
        let (_, mut rx1, _) = b.add_listener("10.0.0.1");
        let (_, mut rx2, count) = b.add_listener("10.0.0.2");
        assert_eq!(count, 2);

        b.broadcast(&Bytes::from_static(b"abc"));
        assert_eq!(rx1.recv().await.unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(rx2.recv().await.unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn test_closed_listener_is_removed() {
        let b = Broadcaster::new();
        let (_, rx1, _) = b.add_listener("a");
        let (_, _rx2, _) = b.add_listener("b");
        drop(rx1);

        assert_eq!(b.broadcast(&Bytes::from_static(b"x")), 1);
        assert_eq!(b.count(), 1);
    }

    #[tokio::test]
    async fn test_slow_listener_drops_chunks() {
        let b = Broadcaster::new();
        let (_, mut rx, _) = b.add_listener("slow");
        for i in 0..(LISTENER_CAPACITY + 10) {
            b.broadcast(&Bytes::from(vec![i as u8]));
        }
        assert_eq!(b.count(), 1);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, LISTENER_CAPACITY);
    }

    #[test]
    fn test_remove_listener_returns_count() {
        let b = Broadcaster::new();
        let (id, _rx, _) = b.add_listener("a");
        let (_, _rx2, _) = b.add_listener("b");
        assert_eq!(b.remove_listener(id), 1);
        assert_eq!(b.remove_listener(id), 1);
    }
}
