//! Proxy mono-session pour les sources servies par plages
//!
//! Une seule session à la fois : `start` annule la précédente, lance la
//! requête amont et ne rend la main qu'une fois le tampon alloué à la taille
//! annoncée par l'amont. Les lecteurs suivent ensuite `bytes_read` jusqu'à
//! disposer de la plage demandée.
//!
//! ```text
//! IDLE ──start──► BUFFERING ──fin──► COMPLETED
//!                     │
//!                     └──erreur──► ERROR
//! cancel() : * ──► IDLE
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use partyplayer::{PartyController, PartyEvent, PROXY_STREAM_PATH};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ProxyError;

/// Plafond de taille d'un titre mis en mémoire
pub const DEFAULT_MAX_CONTENT_LENGTH: u64 = 50 * 1024 * 1024;

const READY_POLL: Duration = Duration::from_millis(50);
const DATA_POLL: Duration = Duration::from_millis(20);

/// Taille des morceaux envoyés aux clients
pub const PROXY_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub max_content_length: u64,
    /// Attente maximale de l'allocation du tampon côté lecteur
    pub ready_timeout: Duration,
    /// Referer envoyé si la source n'en fournit pas
    pub referer: Option<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            ready_timeout: Duration::from_secs(5),
            referer: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyStatus {
    #[default]
    Idle,
    Buffering,
    Completed,
    Error,
}

/// Tampon de taille fixe, rempli dans l'ordre
#[derive(Debug)]
pub struct ProxyBuffer {
    data: RwLock<Vec<u8>>,
    total: u64,
    bytes_read: AtomicU64,
}

impl ProxyBuffer {
    fn new(total: u64) -> Self {
        Self {
            data: RwLock::new(vec![0; total as usize]),
            total,
            bytes_read: AtomicU64::new(0),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Acquire)
    }

    /// Retourne `false` si le morceau dépasse la taille annoncée
    fn append(&self, chunk: &[u8]) -> bool {
        let mut data = self.data.write();
        let start = self.bytes_read.load(Ordering::Relaxed) as usize;
        let end = start + chunk.len();
        if end > data.len() {
            return false;
        }
        data[start..end].copy_from_slice(chunk);
        self.bytes_read.store(end as u64, Ordering::Release);
        true
    }

    /// Copie au plus `max` octets déjà reçus à partir de `start`
    pub fn read(&self, start: u64, max: usize) -> Bytes {
        let available = self.bytes_read();
        if start >= available {
            return Bytes::new();
        }
        let end = available.min(start + max as u64);
        let data = self.data.read();
        Bytes::copy_from_slice(&data[start as usize..end as usize])
    }
}

#[derive(Debug, Default)]
struct ProxyState {
    session: u64,
    status: ProxyStatus,
    url: Option<String>,
    buffer: Option<Arc<ProxyBuffer>>,
    task: Option<JoinHandle<()>>,
}

/// Vue cohérente de la session courante
#[derive(Debug, Clone)]
pub struct ProxySnapshot {
    pub session: u64,
    pub status: ProxyStatus,
    pub url: Option<String>,
    pub buffer: Option<Arc<ProxyBuffer>>,
}

impl ProxySnapshot {
    /// Le tampon est alloué et la session n'est ni annulée ni en erreur
    pub fn is_servable(&self) -> bool {
        self.buffer.is_some()
            && matches!(self.status, ProxyStatus::Buffering | ProxyStatus::Completed)
    }
}

#[derive(Debug)]
pub struct ProxyStreamer {
    client: reqwest::Client,
    settings: ProxySettings,
    state: Mutex<ProxyState>,
}

impl ProxyStreamer {
    pub fn new(settings: ProxySettings) -> anyhow::Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(settings, client))
    }

    pub fn with_client(settings: ProxySettings, client: reqwest::Client) -> Arc<Self> {
        Arc::new(Self {
            client,
            settings,
            state: Mutex::new(ProxyState::default()),
        })
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    pub fn snapshot(&self) -> ProxySnapshot {
        let state = self.state.lock();
        ProxySnapshot {
            session: state.session,
            status: state.status,
            url: state.url.clone(),
            buffer: state.buffer.clone(),
        }
    }

    pub fn status(&self) -> ProxyStatus {
        self.state.lock().status
    }

    /// Démarre une session et attend l'allocation du tampon
    ///
    /// Retourne l'identifiant de session. Toute session précédente est
    /// annulée.
    pub async fn start(
        self: &Arc<Self>,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<u64, ProxyError> {
        if !url.starts_with("http") {
            warn!(url = %url, "Invalid proxy target");
            return Err(ProxyError::InvalidUrl(url.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let session = {
            let mut state = self.state.lock();
            if let Some(task) = state.task.take() {
                debug!(session = state.session, "Aborting previous proxy download");
                task.abort();
            }
            state.session += 1;
            state.status = ProxyStatus::Buffering;
            state.url = Some(url.to_string());
            state.buffer = None;

            let session = state.session;
            let this = Arc::clone(self);
            state.task = Some(tokio::spawn(this.download(
                session,
                url.to_string(),
                headers.to_vec(),
                tx,
            )));
            session
        };
        info!(url = %url, session, "Proxy session started");

        match rx.await {
            Ok(result) => result.map(|()| session),
            Err(_) => Err(ProxyError::Cancelled),
        }
    }

    async fn download(
        self: Arc<Self>,
        session: u64,
        url: String,
        headers: Vec<(String, String)>,
        ready: oneshot::Sender<Result<(), ProxyError>>,
    ) {
        let mut ready = Some(ready);
        let result = self.fetch(session, &url, &headers, &mut ready).await;

        let status = match &result {
            Ok(()) => ProxyStatus::Completed,
            Err(_) => ProxyStatus::Error,
        };
        let current = self.finish(session, status);

        match result {
            Ok(()) => {
                if current {
                    info!(url = %url, session, "Proxy download completed");
                }
            }
            Err(e) => {
                if current {
                    warn!(url = %url, session, "Proxy download failed: {}", e);
                }
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e));
                }
            }
        }
    }

    async fn fetch(
        &self,
        session: u64,
        url: &str,
        headers: &[(String, String)],
        ready: &mut Option<oneshot::Sender<Result<(), ProxyError>>>,
    ) -> Result<(), ProxyError> {
        let mut request = self.client.get(url);
        let mut has_referer = false;
        for (name, value) in headers {
            has_referer |= name.eq_ignore_ascii_case("referer");
            request = request.header(name.as_str(), value.as_str());
        }
        if !has_referer {
            if let Some(referer) = &self.settings.referer {
                request = request.header(reqwest::header::REFERER, referer.as_str());
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProxyError::Upstream(format!("HTTP {}", response.status())));
        }

        let max = self.settings.max_content_length;
        let total = match response.content_length() {
            None | Some(0) => return Err(ProxyError::MissingLength),
            Some(length) if length > max => return Err(ProxyError::TooLarge { length, max }),
            Some(length) => length,
        };

        let buffer = Arc::new(ProxyBuffer::new(total));
        {
            let mut state = self.state.lock();
            if state.session != session {
                return Err(ProxyError::Cancelled);
            }
            state.buffer = Some(buffer.clone());
        }
        info!(bytes = total, session, "Allocated proxy buffer");
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ProxyError::Upstream(e.to_string()))?;
            if !buffer.append(&chunk) {
                return Err(ProxyError::TooLarge {
                    length: buffer.bytes_read() + chunk.len() as u64,
                    max: total,
                });
            }
        }

        let received = buffer.bytes_read();
        if received < total {
            return Err(ProxyError::Upstream(format!(
                "body ended after {} of {} bytes",
                received, total
            )));
        }
        Ok(())
    }

    /// Fixe le statut final si la session est toujours la courante
    fn finish(&self, session: u64, status: ProxyStatus) -> bool {
        let mut state = self.state.lock();
        if state.session != session {
            return false;
        }
        state.status = status;
        state.task = None;
        true
    }

    /// Abandonne la session courante et revient à IDLE
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        let previous = state.status;
        state.session += 1;
        state.status = ProxyStatus::Idle;
        state.url = None;
        state.buffer = None;
        if previous != ProxyStatus::Idle {
            info!("Proxy session cancelled");
        }
    }

    /// Attend que le tampon soit alloué, que la session échoue ou que le
    /// délai expire
    pub async fn wait_ready(&self, timeout: Duration) -> ProxySnapshot {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.snapshot();
            if snapshot.status != ProxyStatus::Buffering
                || snapshot.buffer.is_some()
                || Instant::now() >= deadline
            {
                return snapshot;
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    /// Flux des octets `[start, end]` d'une session
    ///
    /// Le flux attend l'arrivée des données et s'arrête si la session est
    /// annulée, remplacée ou en erreur.
    pub fn stream_range(
        self: &Arc<Self>,
        snapshot: &ProxySnapshot,
        start: u64,
        end: u64,
    ) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let this = Arc::clone(self);
        let session = snapshot.session;
        let buffer = snapshot.buffer.clone();

        stream! {
            let buffer = match buffer {
                Some(b) => b,
                None => return,
            };
            let mut position = start;
            while position <= end {
                if position >= buffer.bytes_read() {
                    let current = this.snapshot();
                    if current.session != session
                        || matches!(current.status, ProxyStatus::Idle | ProxyStatus::Error)
                    {
                        debug!(session, position, "Proxy session ended while client was waiting");
                        break;
                    }
                    if current.status == ProxyStatus::Completed {
                        break;
                    }
                    tokio::time::sleep(DATA_POLL).await;
                    continue;
                }

                let want = (end - position + 1).min(PROXY_CHUNK_SIZE as u64) as usize;
                let chunk = buffer.read(position, want);
                position += chunk.len() as u64;
                yield Ok::<_, std::io::Error>(chunk);
            }
        }
    }

    /// Suit le lecteur : démarre le proxy pour une session publiée sur
    /// `/proxy/stream` et l'annule quand la lecture passe à autre chose
    pub fn spawn_binder(
        self: &Arc<Self>,
        controller: Arc<PartyController>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut events = controller.subscribe();

        tokio::spawn(async move {
            let mut bound: Option<u64> = None;
            this.rebind(&controller, &mut bound);
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(PartyEvent::State(_)) | Err(RecvError::Lagged(_)) => {
                        this.rebind(&controller, &mut bound)
                    }
                    Ok(_) => {}
                    Err(RecvError::Closed) => break,
                }
            }
            this.cancel();
            debug!("Proxy binder stopped");
        })
    }

    fn rebind(self: &Arc<Self>, controller: &PartyController, bound: &mut Option<u64>) {
        let wanted = controller
            .current_media()
            .filter(|m| m.media_url == PROXY_STREAM_PATH);

        match wanted {
            Some(media) if *bound == Some(media.session_id) => {}
            Some(media) => {
                *bound = Some(media.session_id);
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let playable = media.playable;
                    if let Err(e) = this.start(&playable.url, &playable.headers).await {
                        warn!(title = %playable.track.title, "Cannot proxy track: {}", e);
                    }
                });
            }
            None => {
                if bound.take().is_some() {
                    self.cancel();
                }
            }
        }
    }
}
