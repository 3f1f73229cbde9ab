//! Sélection équitable du prochain titre.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::str::FromStr;

use parking_lot::Mutex;
use partysource::{Track, TrackKey};
use rand::seq::IndexedRandom;
use tracing::{debug, info};

use crate::entry::{
    strip_priority_prefix, Priority, PromoteOutcome, QueueEntry, QueueEntryView, Readiness,
    Submitter,
};
use crate::{QueueError, Result};

/// Politique vis-à-vis des soumissions en double
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Aucun contrôle
    Allow,
    /// Un même titre ne peut figurer qu'une fois dans la file
    #[default]
    RejectSameTrack,
    /// Un même soumetteur ne peut pas ajouter deux fois le même titre
    RejectSameSubmitter,
}

impl FromStr for DuplicatePolicy {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(DuplicatePolicy::Allow),
            "reject_track" | "reject_same_track" => Ok(DuplicatePolicy::RejectSameTrack),
            "reject_same_submitter" => Ok(DuplicatePolicy::RejectSameSubmitter),
            other => Err(QueueError::InvalidPolicy(other.to_string())),
        }
    }
}

/// Paramètres de la file
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_size: usize,
    pub history_size: usize,
    pub duplicate_policy: DuplicatePolicy,
    /// Pioche dans l'historique quand la file est vide
    pub auto_dj: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: 1000,
            history_size: 50,
            duplicate_policy: DuplicatePolicy::default(),
            auto_dj: true,
        }
    }
}

/// Contexte d'une sélection
#[derive(Debug, Clone, Copy)]
pub struct PollContext<'a> {
    pub shuffle: bool,
    /// Identifiants des soumetteurs actuellement connectés
    pub online: &'a HashSet<String>,
    /// Au moins un auditeur (web ou flux live) est présent
    pub listeners_present: bool,
}

impl<'a> PollContext<'a> {
    pub fn new(shuffle: bool, online: &'a HashSet<String>, listeners_present: bool) -> Self {
        Self {
            shuffle,
            online,
            listeners_present,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    /// Titres terminés, le plus récent en tête
    history: VecDeque<Track>,
    last_served: Option<String>,
}

impl QueueState {
    fn position(&self, id: &str) -> Option<usize> {
        let raw = strip_priority_prefix(id);
        self.entries.iter().position(|e| e.entry_id == raw)
    }

    fn global_top_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.priority == Priority::GlobalTop)
            .count()
    }

    /// Déplace l'entrée derrière les têtes globales existantes
    fn move_to_global_top(&mut self, index: usize) {
        if let Some(mut entry) = self.entries.remove(index) {
            entry.priority = Priority::GlobalTop;
            let at = self.global_top_count();
            self.entries.insert(at, entry);
        }
    }

    /// Retire l'entrée si elle est READY, la copie sinon (FAILED)
    fn take(&mut self, index: usize, rotate: bool) -> Option<QueueEntry> {
        let entry = self.entries.get(index)?;
        if entry.readiness == Readiness::Failed {
            return Some(entry.clone());
        }
        let entry = self.entries.remove(index)?;
        if rotate {
            self.last_served = Some(entry.submitter.id.clone());
        }
        Some(entry)
    }

    fn pick_round_robin(&self, online: &HashSet<String>) -> Option<usize> {
        let mut by_submitter: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, e) in self.entries.iter().enumerate() {
            if e.is_candidate() {
                by_submitter.entry(e.submitter.id.as_str()).or_default().push(i);
            }
        }
        if by_submitter.is_empty() {
            return None;
        }

        let online_ids: Vec<&str> = by_submitter
            .keys()
            .copied()
            .filter(|id| online.contains(*id))
            .collect();
        let pool: Vec<&str> = if online_ids.is_empty() {
            by_submitter.keys().copied().collect()
        } else {
            online_ids
        };

        // pool est trié (clés d'un BTreeMap)
        let chosen = match &self.last_served {
            Some(last) if pool.contains(&last.as_str()) => pool
                .iter()
                .find(|id| **id > last.as_str())
                .unwrap_or(&pool[0]),
            _ => &pool[0],
        };

        let indices = by_submitter.get(chosen)?;
        indices
            .iter()
            .copied()
            .find(|i| self.entries[*i].priority == Priority::PersonalTop)
            .or_else(|| indices.choose(&mut rand::rng()).copied())
    }

    /// Tirage uniforme sur tout l'historique
    fn auto_dj(&self) -> Option<QueueEntry> {
        let pool: Vec<&Track> = self.history.iter().collect();
        let track = (*pool.choose(&mut rand::rng())?).clone();
        let mut entry = QueueEntry::new(track, Submitter::system(), Readiness::Ready);
        entry.auto_dj = true;
        Some(entry)
    }
}

/// File partagée et sélection du prochain titre
///
/// Toutes les opérations passent par un unique verrou ; les lectures
/// renvoient des copies.
#[derive(Debug)]
pub struct QueueScheduler {
    settings: QueueSettings,
    state: Mutex<QueueState>,
}

impl QueueScheduler {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Ajoute une entrée en fin de file
    pub fn add(&self, entry: QueueEntry) -> Result<QueueEntryView> {
        let mut state = self.state.lock();

        if state.entries.len() >= self.settings.max_size {
            return Err(QueueError::CapacityExceeded {
                max: self.settings.max_size,
            });
        }

        let key = entry.key();
        let duplicate = match self.settings.duplicate_policy {
            DuplicatePolicy::Allow => false,
            DuplicatePolicy::RejectSameTrack => state.entries.iter().any(|e| e.key() == key),
            DuplicatePolicy::RejectSameSubmitter => state
                .entries
                .iter()
                .any(|e| e.key() == key && e.submitter.id == entry.submitter.id),
        };
        if duplicate {
            return Err(QueueError::Duplicate(key.to_string()));
        }

        debug!(track = %key, submitter = %entry.submitter.id, "queue add");
        let view = entry.view();
        state.entries.push_back(entry);
        Ok(view)
    }

    /// Choisit le prochain candidat
    ///
    /// Une entrée READY est retirée de la file ; une entrée FAILED est
    /// renvoyée en place. Quand la file est vide et qu'un auditeur est
    /// présent, un titre de l'historique peut être proposé (auto-DJ).
    pub fn poll_next(&self, ctx: &PollContext<'_>) -> Option<QueueEntry> {
        let mut state = self.state.lock();

        if let Some(i) = state
            .entries
            .iter()
            .position(|e| e.priority == Priority::GlobalTop && e.is_candidate())
        {
            return state.take(i, false);
        }

        let picked = if ctx.shuffle {
            state.pick_round_robin(ctx.online)
        } else {
            state.entries.iter().position(|e| e.is_candidate())
        };
        if let Some(i) = picked {
            return state.take(i, true);
        }

        if state.entries.is_empty() && ctx.listeners_present && self.settings.auto_dj {
            let entry = state.auto_dj();
            if let Some(entry) = &entry {
                info!(title = %entry.track.title, "auto-DJ pick from history");
            }
            return entry;
        }
        None
    }

    /// Promeut une entrée (tête personnelle puis tête globale)
    pub fn promote(&self, id: &str, shuffle: bool) -> Result<PromoteOutcome> {
        let mut state = self.state.lock();
        let index = state
            .position(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        let outcome = match state.entries[index].priority {
            Priority::GlobalTop => PromoteOutcome::Unchanged,
            Priority::Normal if shuffle => {
                state.entries[index].priority = Priority::PersonalTop;
                PromoteOutcome::PersonalTop
            }
            Priority::Normal | Priority::PersonalTop => {
                state.move_to_global_top(index);
                PromoteOutcome::GlobalTop
            }
        };
        debug!(entry = %strip_priority_prefix(id), ?outcome, "queue promote");
        Ok(outcome)
    }

    /// Retire une entrée (identifiant brut ou préfixé)
    pub fn remove(&self, id: &str) -> Result<QueueEntry> {
        let mut state = self.state.lock();
        let index = state
            .position(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        state
            .entries
            .remove(index)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    /// Retourne l'entrée sans la retirer
    pub fn get(&self, id: &str) -> Option<QueueEntry> {
        let state = self.state.lock();
        state.position(id).map(|i| state.entries[i].clone())
    }

    /// Retire toutes les entrées d'un soumetteur
    pub fn remove_by_submitter(&self, submitter_id: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.submitter.id != submitter_id);
        before - state.entries.len()
    }

    /// Vide la file en conservant l'historique et la rotation
    pub fn clear_pending(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.entries.len();
        state.entries.clear();
        n
    }

    /// Remet la file à zéro, historique compris
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.history.clear();
        state.last_served = None;
    }

    /// Archive un titre terminé (sans doublon, le plus récent en tête)
    pub fn add_to_history(&self, track: Track) {
        if self.settings.history_size == 0 {
            return;
        }
        let mut state = self.state.lock();
        let key = track.key();
        state.history.retain(|t| t.key() != key);
        state.history.push_front(track);
        state.history.truncate(self.settings.history_size);
    }

    /// Oublie un titre de l'historique ; l'auto-DJ ne le proposera plus
    pub fn remove_from_history(&self, key: &TrackKey) -> bool {
        let mut state = self.state.lock();
        let before = state.history.len();
        state.history.retain(|t| &t.key() != key);
        state.history.len() != before
    }

    /// Met à jour la disponibilité de toutes les entrées d'un titre
    pub fn update_status(&self, key: &TrackKey, readiness: Readiness) -> usize {
        let mut state = self.state.lock();
        let mut n = 0;
        for entry in state.entries.iter_mut().filter(|e| &e.key() == key) {
            entry.readiness = readiness;
            n += 1;
        }
        n
    }

    pub fn contains_track(&self, key: &TrackKey) -> bool {
        self.state.lock().entries.iter().any(|e| &e.key() == key)
    }

    /// Vue ordonnée de la file
    pub fn snapshot(&self) -> Vec<QueueEntryView> {
        self.state.lock().entries.iter().map(QueueEntry::view).collect()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }

    pub fn history(&self) -> Vec<Track> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Recharge un état sauvegardé
    pub fn restore(&self, entries: Vec<QueueEntry>, history: Vec<Track>) {
        let mut state = self.state.lock();
        state.entries = entries
            .into_iter()
            .take(self.settings.max_size)
            .collect();
        state.history = history
            .into_iter()
            .take(self.settings.history_size)
            .collect();
        state.last_served = None;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> Track {
        Track {
            id: id.into(),
            title: format!("Title {id}"),
            artists: vec!["Artist".into()],
            duration_ms: 180_000,
            platform: "demo".into(),
            cover_url: None,
        }
    }

    fn entry(id: &str, user: &str, readiness: Readiness) -> QueueEntry {
        QueueEntry::new(track(id), Submitter::new(user, user), readiness)
    }

    #[test]
    fn duplicate_policy_parses_config_values() {
        assert_eq!("allow".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Allow));
        assert_eq!(
            "REJECT_TRACK".parse::<DuplicatePolicy>(),
            Ok(DuplicatePolicy::RejectSameTrack)
        );
        assert_eq!(
            "reject_same_submitter".parse::<DuplicatePolicy>(),
            Ok(DuplicatePolicy::RejectSameSubmitter)
        );
        assert!("whatever".parse::<DuplicatePolicy>().is_err());
    }

    #[test]
    fn failed_entry_is_returned_but_not_removed() {
        let queue = QueueScheduler::new(QueueSettings::default());
        queue.add(entry("a", "u1", Readiness::Failed)).unwrap();
        queue.add(entry("b", "u1", Readiness::Ready)).unwrap();
        let online = HashSet::new();
        let ctx = PollContext::new(false, &online, true);

        let first = queue.poll_next(&ctx).unwrap();
        assert_eq!(first.readiness, Readiness::Failed);
        assert_eq!(queue.len(), 2);

        queue.remove(&first.entry_id).unwrap();
        let second = queue.poll_next(&ctx).unwrap();
        assert_eq!(second.track.id, "b");
        assert!(queue.is_empty());
    }

    #[test]
    fn pending_entries_are_invisible_but_kept() {
        let queue = QueueScheduler::new(QueueSettings::default());
        let pending = queue.add(entry("a", "u1", Readiness::Pending)).unwrap();
        let online = HashSet::new();
        let ctx = PollContext::new(false, &online, true);

        assert!(queue.poll_next(&ctx).is_none());
        assert_eq!(queue.len(), 1);

        let key = TrackKey::new("demo", "a");
        assert_eq!(queue.update_status(&key, Readiness::Ready), 1);
        let next = queue.poll_next(&ctx).unwrap();
        assert_eq!(next.queue_id(), pending.queue_id);
    }

    #[test]
    fn last_served_does_not_move_on_failed_pick() {
        let queue = QueueScheduler::new(QueueSettings::default());
        queue.add(entry("a", "u1", Readiness::Failed)).unwrap();
        queue.add(entry("b", "u2", Readiness::Ready)).unwrap();
        let online = HashSet::new();
        let ctx = PollContext::new(true, &online, true);

        let failed = queue.poll_next(&ctx).unwrap();
        assert_eq!(failed.submitter.id, "u1");
        queue.remove(&failed.entry_id).unwrap();
        assert!(queue.state.lock().last_served.is_none());

        assert_eq!(queue.poll_next(&ctx).unwrap().submitter.id, "u2");
        assert_eq!(queue.state.lock().last_served.as_deref(), Some("u2"));
    }

    #[test]
    fn history_is_deduplicated_and_capped() {
        let queue = QueueScheduler::new(QueueSettings {
            history_size: 2,
            ..QueueSettings::default()
        });
        queue.add_to_history(track("a"));
        queue.add_to_history(track("b"));
        queue.add_to_history(track("a"));
        let ids: Vec<_> = queue.history().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        queue.add_to_history(track("c"));
        let ids: Vec<_> = queue.history().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn clear_pending_keeps_history_and_clear_all_does_not() {
        let queue = QueueScheduler::new(QueueSettings::default());
        queue.add(entry("a", "u1", Readiness::Ready)).unwrap();
        queue.add_to_history(track("z"));

        assert_eq!(queue.clear_pending(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.history().len(), 1);

        queue.clear_all();
        assert!(queue.history().is_empty());
    }

    #[test]
    fn auto_dj_can_pick_any_history_track() {
        let queue = QueueScheduler::new(QueueSettings::default());
        queue.add_to_history(track("b"));
        queue.add_to_history(track("a"));
        let online = HashSet::new();
        let ctx = PollContext::new(false, &online, true);

        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let pick = queue.poll_next(&ctx).unwrap();
            assert!(pick.auto_dj);
            seen.insert(pick.track.id);
        }
        assert!(seen.contains("a"));
        assert!(seen.contains("b"));
    }

    #[test]
    fn removed_history_track_is_never_picked() {
        let queue = QueueScheduler::new(QueueSettings::default());
        queue.add_to_history(track("gone"));
        let online = HashSet::new();
        let ctx = PollContext::new(false, &online, true);

        assert!(queue.remove_from_history(&TrackKey::new("demo", "gone")));
        assert!(!queue.remove_from_history(&TrackKey::new("demo", "gone")));
        assert!(queue.history().is_empty());
        assert!(queue.poll_next(&ctx).is_none());
    }

    #[test]
    fn restore_respects_capacity() {
        let queue = QueueScheduler::new(QueueSettings {
            max_size: 2,
            ..QueueSettings::default()
        });
        let entries = vec![
            entry("a", "u1", Readiness::Ready),
            entry("b", "u1", Readiness::Ready),
            entry("c", "u1", Readiness::Ready),
        ];
        queue.restore(entries, vec![track("h")]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.history().len(), 1);
    }
}
