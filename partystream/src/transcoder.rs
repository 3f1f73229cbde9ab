//! Diffusion live MP3 via ffmpeg
//!
//! Un seul processus ffmpeg tourne à la fois. Il est (re)lancé, positionné
//! sur la tête de lecture courante, dès que l'un de ces éléments change :
//! diffusion activée, présence d'auditeurs, session de lecture, pause.
//! Sa sortie est découpée en morceaux et recopiée à chaque auditeur par le
//! [`Broadcaster`].

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use partyplayer::{BroadcastSwitch, CurrentMedia, PartyController, PartyEvent};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, ListenerId};
use crate::{Result, StreamError};

#[derive(Debug, Clone)]
pub struct TranscoderSettings {
    pub ffmpeg_path: String,
    /// Débit MP3 passé à `-ab` (ex. `128k`)
    pub bitrate: String,
    /// Taille des lectures sur la sortie d'ffmpeg
    pub chunk_size: usize,
    /// État initial de la diffusion
    pub enabled: bool,
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            bitrate: "128k".into(),
            chunk_size: 4096,
            enabled: false,
        }
    }
}

/// Entrée d'ffmpeg : fichier local ou URL amont
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInput {
    pub source: String,
    pub headers: Vec<(String, String)>,
}

impl MediaInput {
    /// Préfère le fichier du cache, sinon l'URL amont avec ses en-têtes
    pub fn for_media(media: &CurrentMedia) -> Option<Self> {
        if let Some(path) = &media.local_path {
            return Some(Self {
                source: path.to_string_lossy().into_owned(),
                headers: Vec::new(),
            });
        }
        if media.playable.url.is_empty() {
            return None;
        }
        Some(Self {
            source: media.playable.url.clone(),
            headers: media.playable.headers.clone(),
        })
    }

    fn is_remote(&self) -> bool {
        self.source.starts_with("http://") || self.source.starts_with("https://")
    }
}

/// Arguments d'ffmpeg pour transcoder `input` en MP3 temps réel à partir
/// de `position_ms`
pub fn ffmpeg_args(input: &MediaInput, position_ms: u64, bitrate: &str) -> Vec<String> {
    let mut args = Vec::new();

    if input.is_remote() && !input.headers.is_empty() {
        let headers: String = input
            .headers
            .iter()
            .map(|(k, v)| format!("{}: {}\r\n", k, v))
            .collect();
        args.push("-headers".to_string());
        args.push(headers);
    }

    args.push("-ss".to_string());
    args.push(format!("{:.2}", position_ms as f64 / 1000.0));
    args.push("-re".to_string());
    args.push("-i".to_string());
    args.push(input.source.clone());

    for a in [
        "-vn", "-acodec", "libmp3lame", "-ab", bitrate, "-ac", "2", "-ar", "44100", "-f", "mp3",
        "pipe:1",
    ] {
        args.push(a.to_string());
    }
    args
}

#[derive(Debug, Default)]
struct RunState {
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    /// Session diffusée par le processus courant
    session: Option<u64>,
}

#[derive(Debug)]
pub struct LiveBroadcast {
    settings: TranscoderSettings,
    controller: Arc<PartyController>,
    broadcaster: Arc<Broadcaster>,
    enabled: AtomicBool,
    state: Mutex<RunState>,
    wake: Notify,
}

/// Auditeur enregistré ; le retirer en le détruisant
#[derive(Debug)]
pub struct ListenerGuard {
    live: Arc<LiveBroadcast>,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let count = self.live.broadcaster.remove_listener(self.id);
        self.live.listeners_changed(count);
    }
}

impl LiveBroadcast {
    pub fn new(settings: TranscoderSettings, controller: Arc<PartyController>) -> Arc<Self> {
        let enabled = settings.enabled;
        Arc::new(Self {
            settings,
            controller,
            broadcaster: Arc::new(Broadcaster::new()),
            enabled: AtomicBool::new(enabled),
            state: Mutex::new(RunState::default()),
            wake: Notify::new(),
        })
    }

    pub fn settings(&self) -> &TranscoderSettings {
        &self.settings
    }

    pub fn listeners(&self) -> usize {
        self.broadcaster.count()
    }

    /// Enregistre un auditeur
    pub fn listen(
        self: &Arc<Self>,
        remote: impl Into<String>,
    ) -> Result<(ListenerGuard, mpsc::Receiver<Bytes>)> {
        if !self.is_enabled() {
            return Err(StreamError::Disabled);
        }
        let (id, rx, count) = self.broadcaster.add_listener(remote);
        self.listeners_changed(count);
        Ok((
            ListenerGuard {
                live: Arc::clone(self),
                id,
            },
            rx,
        ))
    }

    fn listeners_changed(&self, count: usize) {
        self.controller.set_stream_listeners(count);
        self.wake.notify_one();
    }

    /// Session que le processus doit diffuser, `None` s'il doit être arrêté
    fn wanted(&self) -> Option<CurrentMedia> {
        if !self.is_enabled() || self.broadcaster.count() == 0 {
            return None;
        }
        self.controller.current_media().filter(|m| !m.paused)
    }

    async fn reconcile(&self) {
        let wanted = self.wanted();
        let mut state = self.state.lock().await;

        let wanted_session = wanted.as_ref().map(|m| m.session_id);
        if wanted_session == state.session {
            return;
        }

        stop_process(&mut state).await;

        let Some(media) = wanted else {
            return;
        };
        let Some(input) = MediaInput::for_media(&media) else {
            debug!(session = media.session_id, "No input available for live stream");
            return;
        };

        match self.launch(&input, media.position_ms) {
            Ok((child, reader)) => {
                info!(
                    title = %media.playable.track.title,
                    position_ms = media.position_ms,
                    "Live transcoder started"
                );
                state.child = Some(child);
                state.reader = Some(reader);
                state.session = Some(media.session_id);
            }
            Err(e) => {
                warn!("Cannot start live transcoder: {}", e);
            }
        }
    }

    fn launch(&self, input: &MediaInput, position_ms: u64) -> Result<(Child, JoinHandle<()>)> {
        let args = ffmpeg_args(input, position_ms, &self.settings.bitrate);
        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| StreamError::Spawn(std::io::Error::other("ffmpeg stdout unavailable")))?;

        let broadcaster = Arc::clone(&self.broadcaster);
        let chunk_size = self.settings.chunk_size.max(512);
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; chunk_size];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        debug!("Transcoder output ended");
                        break;
                    }
                    Ok(n) => {
                        broadcaster.broadcast(&Bytes::copy_from_slice(&buf[..n]));
                    }
                    Err(e) => {
                        warn!("Transcoder read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok((child, reader))
    }

    /// Boucle de pilotage du transcodeur jusqu'à l'arrêt
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut events = self.controller.subscribe();

        tokio::spawn(async move {
            this.reconcile().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = this.wake.notified() => this.reconcile().await,
                    event = events.recv() => match event {
                        Ok(PartyEvent::State(_)) | Err(RecvError::Lagged(_)) => {
                            this.reconcile().await
                        }
                        Ok(_) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            let mut state = this.state.lock().await;
            stop_process(&mut state).await;
            debug!("Live broadcast loop stopped");
        })
    }
}

async fn stop_process(state: &mut RunState) {
    if let Some(reader) = state.reader.take() {
        reader.abort();
    }
    if let Some(mut child) = state.child.take() {
        if let Err(e) = child.kill().await {
            debug!("Transcoder already gone: {}", e);
        }
        debug!("Live transcoder stopped");
    }
    state.session = None;
}

impl BroadcastSwitch for LiveBroadcast {
    fn set_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Live broadcast switched");
            if !enabled {
                self.broadcaster.disconnect_all();
                self.controller.set_stream_listeners(0);
            }
            self.wake.notify_one();
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}
