//! Tête de lecture autoritaire
//!
//! `IDLE → LOADING → PLAYING ⇄ PAUSED → IDLE`
//!
//! Chaque tentative de lancement incrémente la génération avant la
//! résolution ; le résultat n'est appliqué que si la génération n'a pas
//! changé. Skip, stop et reset incrémentent aussi la génération, ce qui
//! invalide toute résolution en vol.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use partycache::{CacheEvent, CacheStatus, DownloadRequest, DownloadTarget, MediaCache};
use partyqueue::{
    PollContext, PromoteOutcome, QueueEntry, QueueEntryView, QueueError, QueueScheduler,
    Readiness, Submitter, SYSTEM_SUBMITTER_ID,
};
use partysource::{Acquisition, MediaSource, PlayableTrack, SourceRegistry, Track, TrackKey};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actor::{Actor, Control, LockTarget, Locks};
use crate::events::{EventBus, Level, PartyEvent, PlayerAction, SystemMessage};
use crate::presence::{Presence, PresenceChange};
use crate::state::{NowPlaying, PlayerState, Playhead};
use crate::{PlayerError, Result};

/// Chemin HTTP du proxy pour les sources servies par plages d'octets
pub const PROXY_STREAM_PATH: &str = "/proxy/stream";

/// Réglages du lecteur
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub tick_interval: Duration,
    /// Délai global entre deux contrôles partagés
    pub control_cooldown: Duration,
    pub resolve_timeout: Duration,
    /// Une session en pause depuis plus longtemps est abandonnée
    pub idle_reset_timeout: Duration,
    pub idle_check_interval: Duration,
    pub playlist_import_limit: usize,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            control_cooldown: Duration::from_millis(1000),
            resolve_timeout: Duration::from_secs(10),
            idle_reset_timeout: Duration::from_secs(2 * 3600),
            idle_check_interval: Duration::from_secs(600),
            playlist_import_limit: 100,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    entry: QueueEntry,
    playable: PlayableTrack,
    media_url: String,
    playhead: Playhead,
    liked_by: Vec<String>,
    like_markers: Vec<u64>,
    /// Génération de la tentative qui a lancé la session
    id: u64,
}

#[derive(Debug, Default)]
struct PlayerCore {
    session: Option<Session>,
    loading: bool,
    generation: u64,
    shuffle: bool,
    last_control: Option<Instant>,
    locks: Locks,
}

/// Média à l'antenne, pour la diffusion live et le proxy
#[derive(Debug, Clone)]
pub struct CurrentMedia {
    pub session_id: u64,
    pub playable: PlayableTrack,
    /// URL publiée aux clients pour cette session
    pub media_url: String,
    /// Fichier du cache local s'il est prêt
    pub local_path: Option<PathBuf>,
    pub position_ms: u64,
    pub paused: bool,
}

fn readiness_from(status: CacheStatus) -> Readiness {
    match status {
        CacheStatus::Pending => Readiness::Pending,
        CacheStatus::Downloading => Readiness::Downloading,
        CacheStatus::Ready => Readiness::Ready,
        CacheStatus::Failed => Readiness::Failed,
    }
}

fn submitter_of(actor: &Actor) -> Submitter {
    match actor {
        Actor::User(s) => s.clone(),
        Actor::System => Submitter::system(),
    }
}

/// Contrôleur de la salle d'écoute
#[derive(Debug)]
pub struct PartyController {
    settings: PlayerSettings,
    sources: SourceRegistry,
    queue: Arc<QueueScheduler>,
    cache: Option<Arc<MediaCache>>,
    core: Mutex<PlayerCore>,
    presence: Presence,
    events: EventBus,
}

impl PartyController {
    pub fn new(
        settings: PlayerSettings,
        sources: SourceRegistry,
        queue: Arc<QueueScheduler>,
        cache: Option<Arc<MediaCache>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            sources,
            queue,
            cache,
            core: Mutex::new(PlayerCore::default()),
            presence: Presence::new(),
            events: EventBus::new(),
        })
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn queue(&self) -> &Arc<QueueScheduler> {
        &self.queue
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PartyEvent> {
        self.events.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.core.lock().generation
    }

    pub fn is_loading(&self) -> bool {
        self.core.lock().loading
    }

    pub fn is_shuffle(&self) -> bool {
        self.core.lock().shuffle
    }

    pub fn is_playing(&self) -> bool {
        self.core.lock().session.is_some()
    }

    pub fn locks(&self) -> Locks {
        self.core.lock().locks
    }

    pub fn platforms(&self) -> Vec<String> {
        self.sources.platforms()
    }

    pub fn history(&self) -> Vec<Track> {
        self.queue.history()
    }

    // ----- publication -----

    /// Instantané complet
    pub fn state(&self) -> PlayerState {
        let now = Instant::now();
        let server_time_ms = Utc::now().timestamp_millis();

        let (now_playing, shuffle, loading, locks, generation) = {
            let core = self.core.lock();
            let now_playing = core.session.as_ref().map(|s| NowPlaying {
                track: s.entry.track.clone(),
                media_url: s.media_url.clone(),
                submitter: s.entry.submitter.clone(),
                auto_dj: s.entry.auto_dj,
                position_ms: s.playhead.position_ms(now),
                anchor_timestamp_ms: server_time_ms,
                paused: s.playhead.is_paused(),
                liked_by: s.liked_by.clone(),
                like_markers: s.like_markers.clone(),
            });
            let loading = core.session.is_none() && core.loading;
            (now_playing, core.shuffle, loading, core.locks, core.generation)
        };

        PlayerState {
            paused: now_playing.as_ref().is_some_and(|n| n.paused),
            now_playing,
            queue: self.queue.snapshot(),
            shuffle,
            loading,
            online_users: self.presence.users(),
            stream_listeners: self.presence.stream_listeners(),
            online_count: self.presence.online_count(),
            locks,
            generation,
            server_time_ms,
        }
    }

    pub fn queue_snapshot(&self) -> Vec<QueueEntryView> {
        self.queue.snapshot()
    }

    fn publish_state(&self) {
        self.events.publish(PartyEvent::State(Box::new(self.state())));
    }

    fn publish_queue(&self) {
        self.events.publish(PartyEvent::Queue(self.queue.snapshot()));
    }

    fn notify(&self, level: Level, action: PlayerAction, actor: &str, payload: Option<String>) {
        self.events.publish(PartyEvent::System(SystemMessage {
            level,
            action,
            actor: actor.to_string(),
            payload,
            timestamp: Utc::now(),
        }));
    }

    // ----- boucle de lecture -----

    /// Détecte la fin du titre courant et relance la file si besoin
    pub async fn tick(&self) {
        let now = Instant::now();
        let finished = {
            let mut core = self.core.lock();
            let done = core.session.as_ref().is_some_and(|s| {
                let duration = s.entry.track.duration_ms;
                !s.playhead.is_paused() && duration > 0 && s.playhead.position_ms(now) >= duration
            });
            if done {
                core.session.take()
            } else {
                None
            }
        };

        if let Some(session) = finished {
            info!(title = %session.entry.track.title, "Track finished");
            self.queue.add_to_history(session.entry.track);
            self.publish_state();
            self.request_next().await;
            return;
        }

        let idle = {
            let core = self.core.lock();
            core.session.is_none() && !core.loading
        };
        if idle && self.presence.online_count() > 0 && !self.queue.is_empty() {
            self.request_next().await;
        }
    }

    /// Lance le prochain candidat de la file
    ///
    /// Sans effet si une session existe ou si un chargement est en cours.
    /// Un candidat FAILED est signalé, retiré, et le suivant est essayé ; un
    /// échec de résolution fait de même. Un titre auto-DJ irrésoluble est
    /// oublié de l'historique, ce qui borne la boucle.
    pub async fn request_next(&self) {
        loop {
            let (entry, generation) = {
                let mut core = self.core.lock();
                if core.session.is_some() || core.loading {
                    return;
                }
                let online = self.presence.online_ids();
                let ctx = PollContext::new(core.shuffle, &online, self.presence.online_count() > 0);
                let Some(entry) = self.queue.poll_next(&ctx) else {
                    return;
                };
                if entry.readiness == Readiness::Failed {
                    // retiré sous le verrou : un seul appelant le signale
                    if let Err(e) = self.queue.remove(&entry.entry_id) {
                        debug!(entry = %entry.entry_id, "Failed entry already gone: {}", e);
                        continue;
                    }
                } else {
                    core.generation += 1;
                    core.loading = true;
                }
                (entry, core.generation)
            };

            if entry.readiness == Readiness::Failed {
                warn!(title = %entry.track.title, "Skipping track that failed to load");
                self.notify(
                    Level::Error,
                    PlayerAction::ErrorLoad,
                    SYSTEM_SUBMITTER_ID,
                    Some(entry.track.title.clone()),
                );
                self.publish_queue();
                continue;
            }

            info!(title = %entry.track.title, generation, "Loading next track");
            self.publish_state();
            self.publish_queue();

            match self.resolve(&entry.key()).await {
                Ok(playable) => {
                    self.apply(entry, playable, generation);
                    return;
                }
                Err(e) => {
                    let err = PlayerError::Resolution {
                        title: entry.track.title.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{}", err);

                    let current = {
                        let mut core = self.core.lock();
                        if core.generation == generation {
                            core.loading = false;
                            true
                        } else {
                            false
                        }
                    };
                    if !current {
                        debug!(generation, "Stale resolution failure ignored");
                        return;
                    }
                    if entry.auto_dj && self.queue.remove_from_history(&entry.key()) {
                        info!(title = %entry.track.title, "Unplayable track dropped from history");
                    }
                    self.notify(
                        Level::Error,
                        PlayerAction::ErrorLoad,
                        SYSTEM_SUBMITTER_ID,
                        Some(entry.track.title.clone()),
                    );
                    self.publish_state();
                }
            }
        }
    }

    async fn resolve(&self, key: &TrackKey) -> Result<PlayableTrack> {
        let source = self.sources.get(&key.platform)?;
        match tokio::time::timeout(self.settings.resolve_timeout, source.resolve(&key.id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PlayerError::Timeout(self.settings.resolve_timeout)),
        }
    }

    /// Installe la session si la génération n'a pas bougé
    fn apply(&self, entry: QueueEntry, playable: PlayableTrack, generation: u64) -> bool {
        let media_url = self.media_url_for(&playable);
        let title = entry.track.title.clone();
        let submitter = entry.submitter.id.clone();

        let applied = {
            let mut core = self.core.lock();
            if core.generation != generation {
                false
            } else {
                core.loading = false;
                if core.session.is_some() {
                    false
                } else {
                    core.session = Some(Session {
                        entry,
                        playable,
                        media_url,
                        playhead: Playhead::start(Instant::now()),
                        liked_by: Vec::new(),
                        like_markers: Vec::new(),
                        id: generation,
                    });
                    true
                }
            }
        };

        if !applied {
            debug!(title = %title, generation, "Discarded stale play result");
            return false;
        }

        info!(title = %title, "Now playing");
        self.publish_state();
        self.publish_queue();
        self.notify(Level::Info, PlayerAction::Play, &submitter, Some(title));
        true
    }

    /// URL servie aux clients : cache local, proxy ou source directe
    fn media_url_for(&self, playable: &PlayableTrack) -> String {
        let key = playable.track.key();
        if let Some(cache) = &self.cache {
            if let Some(url) = cache.local_url(&key.cache_id()) {
                return url;
            }
            if let Ok(source) = self.sources.get(&key.platform) {
                if source.acquisition() == Acquisition::Cached {
                    self.prefetch(source, &key.id, &playable.extension);
                }
            }
        }
        if playable.needs_proxy {
            PROXY_STREAM_PATH.to_string()
        } else {
            playable.url.clone()
        }
    }

    /// Demande le téléchargement d'un titre ; l'URL est résolue par le worker
    fn prefetch(&self, source: Arc<dyn MediaSource>, track_id: &str, extension: &str) -> Readiness {
        let Some(cache) = &self.cache else {
            return Readiness::Ready;
        };
        let id = TrackKey::new(source.platform(), track_id).cache_id();
        let track_id = track_id.to_string();
        let request = DownloadRequest::new(id, extension, async move {
            let playable = source.resolve(&track_id).await?;
            let mut target = DownloadTarget::new(playable.url);
            target.headers = playable.headers;
            Ok(target)
        });
        readiness_from(cache.submit(request))
    }

    fn readiness_for(
        &self,
        source: &Arc<dyn MediaSource>,
        track_id: &str,
        extension: &str,
    ) -> Readiness {
        match source.acquisition() {
            Acquisition::Direct => Readiness::Ready,
            Acquisition::Cached => self.prefetch(source.clone(), track_id, extension),
        }
    }

    // ----- file -----

    /// Ajoute un titre à la file après en avoir résolu les métadonnées
    pub async fn enqueue(
        &self,
        actor: &Actor,
        platform: &str,
        track_id: &str,
    ) -> Result<QueueEntryView> {
        let source = self.sources.get(platform)?;
        let playable = self.resolve(&TrackKey::new(platform, track_id)).await?;
        let readiness = self.readiness_for(&source, track_id, &playable.extension);

        let entry = QueueEntry::new(playable.track, submitter_of(actor), readiness);
        let title = entry.track.title.clone();
        let view = self.queue.add(entry)?;

        info!(user = %actor, title = %title, ?readiness, "Track enqueued");
        self.publish_queue();
        self.notify(Level::Success, PlayerAction::Add, actor.id(), Some(title));
        Ok(view)
    }

    /// Importe une liste de lecture ; retourne le nombre de titres ajoutés
    pub async fn enqueue_playlist(
        &self,
        actor: &Actor,
        platform: &str,
        playlist_id: &str,
    ) -> Result<usize> {
        let source = self.sources.get(platform)?;
        let limit = self.settings.playlist_import_limit;
        let tracks = tokio::time::timeout(
            self.settings.resolve_timeout,
            source.list_playlist(playlist_id, 0, limit),
        )
        .await
        .map_err(|_| PlayerError::Timeout(self.settings.resolve_timeout))??;

        let submitter = submitter_of(actor);
        let mut added = 0usize;
        for track in tracks.into_iter().take(limit) {
            let readiness = match source.acquisition() {
                Acquisition::Direct => Readiness::Ready,
                Acquisition::Cached => match self.resolve(&track.key()).await {
                    Ok(playable) => self.readiness_for(&source, &track.id, &playable.extension),
                    Err(e) => {
                        warn!(track = %track.key(), "Playlist track skipped: {}", e);
                        continue;
                    }
                },
            };

            match self.queue.add(QueueEntry::new(track, submitter.clone(), readiness)) {
                Ok(_) => added += 1,
                Err(QueueError::CapacityExceeded { .. }) => break,
                Err(e) => debug!("Playlist track not added: {}", e),
            }
        }

        info!(user = %actor, playlist = %playlist_id, added, "Playlist imported");
        self.publish_queue();
        self.notify(
            Level::Success,
            PlayerAction::ImportPlaylist,
            actor.id(),
            Some(added.to_string()),
        );
        Ok(added)
    }

    /// Promeut une entrée (tête personnelle en shuffle, sinon tête globale)
    pub async fn promote(&self, actor: &Actor, entry_id: &str) -> Result<PromoteOutcome> {
        let shuffle = self.is_shuffle();
        let entry = self
            .queue
            .get(entry_id)
            .ok_or_else(|| QueueError::NotFound(entry_id.to_string()))?;
        let outcome = self.queue.promote(entry_id, shuffle)?;

        if outcome != PromoteOutcome::Unchanged {
            info!(user = %actor, title = %entry.track.title, ?outcome, "Track promoted");
            self.publish_queue();
            self.notify(
                Level::Info,
                PlayerAction::Top,
                actor.id(),
                Some(entry.track.title),
            );
        }
        if !self.is_playing() {
            self.request_next().await;
        }
        Ok(outcome)
    }

    pub fn remove(&self, actor: &Actor, entry_id: &str) -> Result<QueueEntry> {
        let removed = self.queue.remove(entry_id)?;
        info!(user = %actor, title = %removed.track.title, "Track removed from queue");
        self.publish_queue();
        self.notify(
            Level::Info,
            PlayerAction::Remove,
            actor.id(),
            Some(removed.track.title.clone()),
        );
        Ok(removed)
    }

    /// Retire toutes les soumissions de l'auteur
    pub fn remove_own(&self, actor: &Actor) -> usize {
        let removed = self.queue.remove_by_submitter(actor.id());
        if removed > 0 {
            info!(user = %actor, removed, "User cleared their submissions");
            self.publish_queue();
            self.notify(
                Level::Info,
                PlayerAction::Remove,
                actor.id(),
                Some(removed.to_string()),
            );
        }
        removed
    }

    /// Vide la file (administration), historique conservé
    pub fn clear_queue(&self) -> usize {
        let cleared = self.queue.clear_pending();
        info!(cleared, "Queue cleared by admin");
        self.publish_queue();
        self.notify(
            Level::Warn,
            PlayerAction::Clear,
            SYSTEM_SUBMITTER_ID,
            Some(cleared.to_string()),
        );
        cleared
    }

    // ----- contrôles partagés -----

    fn check_control(&self, core: &mut PlayerCore, actor: &Actor, control: Control) -> Result<()> {
        if !actor.is_system() && core.locks.is_locked(control) {
            debug!(user = %actor, %control, "Control locked");
            return Err(PlayerError::Locked(control));
        }
        let now = Instant::now();
        if let Some(last) = core.last_control {
            if now.saturating_duration_since(last) < self.settings.control_cooldown {
                warn!(user = %actor, %control, "Action rate limited");
                return Err(PlayerError::RateLimited);
            }
        }
        core.last_control = Some(now);
        Ok(())
    }

    /// Passe au titre suivant
    pub async fn skip(&self, actor: &Actor) -> Result<()> {
        {
            let mut core = self.core.lock();
            self.check_control(&mut core, actor, Control::Skip)?;
            core.generation += 1;
            core.loading = false;
            if let Some(session) = core.session.take() {
                info!(user = %actor, title = %session.entry.track.title, "Track skipped");
            }
        }
        self.notify(Level::Info, PlayerAction::Skip, actor.id(), None);
        self.publish_state();
        self.request_next().await;
        Ok(())
    }

    /// Bascule pause / lecture
    ///
    /// Sans session, démarre la file si elle n'est pas vide. Retourne le
    /// nouvel état de pause, ou `None` quand rien ne jouait.
    pub async fn toggle_pause(&self, actor: &Actor) -> Result<Option<bool>> {
        if !self.is_playing() {
            if !self.queue.is_empty() {
                self.request_next().await;
            }
            return Ok(None);
        }

        let paused = {
            let mut core = self.core.lock();
            self.check_control(&mut core, actor, Control::Pause)?;
            let now = Instant::now();
            let session = core.session.as_mut().ok_or(PlayerError::NothingPlaying)?;
            if session.playhead.is_paused() {
                session.playhead.resume(now);
                false
            } else {
                session.playhead.pause(now, false);
                true
            }
        };

        info!(user = %actor, paused, "Playback toggled");
        self.publish_state();
        let action = if paused {
            PlayerAction::Pause
        } else {
            PlayerAction::Resume
        };
        self.notify(Level::Info, action, actor.id(), None);
        Ok(Some(paused))
    }

    /// Bascule le mode shuffle ; retourne le nouvel état
    pub async fn toggle_shuffle(&self, actor: &Actor) -> Result<bool> {
        let shuffle = {
            let mut core = self.core.lock();
            self.check_control(&mut core, actor, Control::Shuffle)?;
            core.shuffle = !core.shuffle;
            core.shuffle
        };

        info!(user = %actor, shuffle, "Shuffle toggled");
        self.publish_state();
        let action = if shuffle {
            PlayerAction::ShuffleOn
        } else {
            PlayerAction::ShuffleOff
        };
        self.notify(Level::Info, action, actor.id(), None);
        Ok(shuffle)
    }

    /// Like du titre courant ; un seul par utilisateur et par titre
    pub fn like(&self, actor: &Actor) -> Result<bool> {
        let now = Instant::now();
        let liked = {
            let mut core = self.core.lock();
            let session = core.session.as_mut().ok_or(PlayerError::NothingPlaying)?;
            if session.liked_by.iter().any(|id| id == actor.id()) {
                false
            } else {
                session.liked_by.push(actor.id().to_string());
                session.like_markers.push(session.playhead.position_ms(now));
                true
            }
        };

        if liked {
            debug!(user = %actor, "Like received");
            self.notify(Level::Success, PlayerAction::Like, actor.id(), None);
            self.publish_state();
        }
        Ok(liked)
    }

    /// Arrête la lecture sans relancer la file
    pub fn stop(&self) {
        {
            let mut core = self.core.lock();
            core.generation += 1;
            core.loading = false;
            core.session = None;
        }
        info!("Playback stopped");
        self.publish_state();
    }

    /// Remet la salle à zéro : session, file, historique, shuffle
    pub fn reset(&self) {
        {
            let mut core = self.core.lock();
            core.session = None;
            core.loading = false;
            core.shuffle = false;
            core.last_control = None;
            core.generation += 1;
        }
        self.queue.clear_all();
        warn!("Party reset");
        self.publish_state();
        self.publish_queue();
        self.notify(Level::Warn, PlayerAction::Reset, SYSTEM_SUBMITTER_ID, None);
    }

    pub fn set_lock(&self, target: LockTarget, locked: bool) -> Locks {
        let locks = {
            let mut core = self.core.lock();
            core.locks.set(target, locked);
            core.locks
        };
        info!(%target, locked, "Control lock changed");
        self.publish_state();
        self.notify(
            Level::Warn,
            PlayerAction::Lock,
            SYSTEM_SUBMITTER_ID,
            Some(format!("{} {}", target, if locked { "ON" } else { "OFF" })),
        );
        locks
    }

    pub async fn search(&self, platform: &str, keyword: &str) -> Result<Vec<Track>> {
        let source = self.sources.get(platform)?;
        match tokio::time::timeout(self.settings.resolve_timeout, source.search(keyword)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PlayerError::Timeout(self.settings.resolve_timeout)),
        }
    }

    // ----- présence -----

    pub fn user_joined(&self, id: &str, name: &str) {
        let change = self.presence.user_joined(id, name);
        debug!(user = %id, online = change.after, "User joined");
        self.on_presence_change(change);
    }

    pub fn user_left(&self, id: &str) {
        let change = self.presence.user_left(id);
        debug!(user = %id, online = change.after, "User left");
        self.on_presence_change(change);
    }

    /// Nombre d'auditeurs du flux live, rapporté par la diffusion
    pub fn set_stream_listeners(&self, listeners: usize) {
        let change = self.presence.set_stream_listeners(listeners);
        self.on_presence_change(change);
    }

    fn on_presence_change(&self, change: PresenceChange) {
        let now = Instant::now();
        if change.became_empty() {
            let paused = {
                let mut core = self.core.lock();
                core.session
                    .as_mut()
                    .is_some_and(|s| s.playhead.pause(now, true))
            };
            if paused {
                info!("Last listener left, pausing");
            }
        } else if change.became_occupied() {
            let resumed = {
                let mut core = self.core.lock();
                match core.session.as_mut() {
                    Some(s) if s.playhead.is_idle_pause() => s.playhead.resume(now),
                    _ => false,
                }
            };
            if resumed {
                info!("Listener back, resuming");
            }
        }
        if change.before != change.after {
            self.publish_state();
        }
    }

    /// Abandonne une session en pause depuis trop longtemps
    pub fn check_idle(&self) -> bool {
        let now = Instant::now();
        let expired = {
            let mut core = self.core.lock();
            let stale = core
                .session
                .as_ref()
                .and_then(|s| s.playhead.paused_at())
                .is_some_and(|at| now.saturating_duration_since(at) > self.settings.idle_reset_timeout);
            if stale {
                core.session.take()
            } else {
                None
            }
        };

        match expired {
            Some(session) => {
                info!(title = %session.entry.track.title, "Idle timeout reached, dropping session");
                self.publish_state();
                true
            }
            None => false,
        }
    }

    // ----- média courant -----

    pub fn current_media(&self) -> Option<CurrentMedia> {
        let now = Instant::now();
        let (playable, media_url, session_id, position_ms, paused) = {
            let core = self.core.lock();
            let s = core.session.as_ref()?;
            (
                s.playable.clone(),
                s.media_url.clone(),
                s.id,
                s.playhead.position_ms(now),
                s.playhead.is_paused(),
            )
        };
        let local_path = self
            .cache
            .as_ref()
            .and_then(|c| c.local_path(&playable.track.key().cache_id()));
        Some(CurrentMedia {
            session_id,
            playable,
            media_url,
            local_path,
            position_ms,
            paused,
        })
    }

    /// Répercute un changement d'état du cache sur la file
    pub async fn handle_cache_event(&self, event: CacheEvent) {
        let CacheEvent::Status { id, status } = event else {
            return;
        };
        let keys: HashSet<TrackKey> = self
            .queue
            .entries()
            .into_iter()
            .map(|e| e.key())
            .filter(|k| k.cache_id() == id)
            .collect();
        if keys.is_empty() {
            return;
        }

        let readiness = readiness_from(status);
        for key in &keys {
            self.queue.update_status(key, readiness);
        }
        debug!(id = %id, ?readiness, "Queue readiness updated");
        self.publish_queue();

        if !self.is_playing() {
            self.request_next().await;
        }
    }

    // ----- tâches de fond -----

    /// Démarre le tick, le nettoyage d'inactivité et l'écoute du cache
    pub fn spawn_tasks(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let this = Arc::clone(self);
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.settings.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => this.tick().await,
                }
            }
            debug!("Player tick stopped");
        }));

        let this = Arc::clone(self);
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.settings.idle_check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        this.check_idle();
                    }
                }
            }
        }));

        if let Some(cache) = &self.cache {
            let mut rx = cache.subscribe();
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = rx.recv() => event,
                    };
                    match event {
                        Ok(event) => this.handle_cache_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Cache listener lagged, {} events dropped", n);
                            this.publish_queue();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        info!("Player tasks started");
        handles
    }
}
