//! Index du cache, worker de téléchargement et éviction LRU.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::download::{DownloadRequest, DownloadTarget, Fetcher};
use crate::record::{file_name_for, id_from_file_name, CacheEvent, CacheRecord, CacheStatus};
use crate::{CacheError, Result};

/// Préfixe HTTP sous lequel les fichiers du cache sont servis
pub const MEDIA_ROUTE: &str = "/media";

const PARTIAL_SUFFIX: &str = ".part";
const EVENT_CAPACITY: usize = 256;

/// Paramètres du cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: PathBuf,
    /// Taille maximale cumulée des fichiers READY
    pub max_bytes: u64,
    /// Pause imposée entre deux téléchargements
    pub cooldown: Duration,
    /// Capacité du tampon de demandes
    pub queue_capacity: usize,
}

impl CacheSettings {
    pub fn new(directory: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            directory: directory.into(),
            max_bytes,
            cooldown: Duration::from_secs(3),
            queue_capacity: 256,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

#[derive(Debug, Default)]
struct CacheIndex {
    records: HashMap<String, CacheRecord>,
    total: u64,
    seq: u64,
}

impl CacheIndex {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Cache média borné
///
/// Toutes les mutations de l'index passent par un unique verrou ; les
/// opérations disque lentes (téléchargement, suppression) sont faites hors
/// verrou.
#[derive(Debug)]
pub struct MediaCache {
    dir: PathBuf,
    max_bytes: u64,
    cooldown: Duration,
    index: Mutex<CacheIndex>,
    events: broadcast::Sender<CacheEvent>,
    tx: mpsc::Sender<DownloadRequest>,
    rx: Mutex<Option<mpsc::Receiver<DownloadRequest>>>,
    fetcher: Arc<dyn Fetcher>,
}

impl MediaCache {
    /// Crée le cache et indexe les fichiers déjà présents dans le répertoire
    pub fn new(settings: CacheSettings, fetcher: Arc<dyn Fetcher>) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&settings.directory)?;

        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let cache = Arc::new(Self {
            dir: settings.directory,
            max_bytes: settings.max_bytes,
            cooldown: settings.cooldown,
            index: Mutex::new(CacheIndex::default()),
            events: broadcast::channel(EVENT_CAPACITY).0,
            tx,
            rx: Mutex::new(Some(rx)),
            fetcher,
        });

        cache.scan()?;
        let victims = cache.collect_evictions();
        cache.delete_files(&victims);
        Ok(cache)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Indexe les fichiers présents au démarrage comme READY
    fn scan(&self) -> Result<()> {
        let mut found = 0usize;
        let mut index = self.index.lock();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with('.') {
                continue;
            }
            if file_name.ends_with(PARTIAL_SUFFIX) {
                // téléchargement interrompu
                let _ = std::fs::remove_file(entry.path());
                continue;
            }

            let id = id_from_file_name(&file_name).to_string();
            let last_access = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let size = metadata.len();
            let seq = index.next_seq();
            let record = CacheRecord {
                id: id.clone(),
                file_name,
                status: CacheStatus::Ready,
                size,
                last_access,
                access_seq: seq,
            };
            if let Some(previous) = index.records.insert(id, record) {
                index.total = index.total.saturating_sub(previous.size);
            }
            index.total += size;
            found += 1;
        }

        info!(
            directory = %self.dir.display(),
            files = found,
            total_bytes = index.total,
            "Media cache scanned"
        );
        Ok(())
    }

    /// Abonnement aux changements d'état
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CacheEvent) {
        let _ = self.events.send(event);
    }

    /// Soumet un téléchargement
    ///
    /// - READY : rafraîchit seulement l'accès
    /// - PENDING / DOWNLOADING : sans effet
    /// - absent ou FAILED : passe PENDING et rejoint la file
    ///
    /// Retourne l'état de l'entrée après la soumission.
    pub fn submit(&self, request: DownloadRequest) -> CacheStatus {
        let id = request.id.clone();
        {
            let mut index = self.index.lock();
            let seq = index.next_seq();
            match index.records.get_mut(&id) {
                Some(record) if record.status == CacheStatus::Ready => {
                    record.touch(seq);
                    return CacheStatus::Ready;
                }
                Some(record)
                    if matches!(
                        record.status,
                        CacheStatus::Pending | CacheStatus::Downloading
                    ) =>
                {
                    return record.status;
                }
                _ => {
                    index
                        .records
                        .insert(id.clone(), CacheRecord::pending(&id, &request.extension, seq));
                }
            }
        }
        self.emit(CacheEvent::Status {
            id: id.clone(),
            status: CacheStatus::Pending,
        });

        match self.tx.try_send(request) {
            Ok(()) => {
                debug!(id = %id, "Download queued");
                CacheStatus::Pending
            }
            Err(_) => {
                warn!(id = %id, "Cannot queue download: {}", CacheError::QueueFull);
                self.set_status(&id, CacheStatus::Failed);
                CacheStatus::Failed
            }
        }
    }

    fn set_status(&self, id: &str, status: CacheStatus) -> bool {
        let changed = {
            let mut index = self.index.lock();
            match index.records.get_mut(id) {
                Some(record) => {
                    record.status = status;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.emit(CacheEvent::Status {
                id: id.to_string(),
                status,
            });
        }
        changed
    }

    /// Démarre le worker de téléchargement
    ///
    /// Retourne `None` si le worker a déjà été démarré.
    pub fn spawn_worker(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self.rx.lock().take()?;
        let cache = Arc::clone(self);

        Some(tokio::spawn(async move {
            info!("Media cache worker started");
            loop {
                let request = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    request = rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                };

                if !cache.process(request).await {
                    continue;
                }

                if !cache.cooldown.is_zero() {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(cache.cooldown) => {}
                    }
                }
            }
            info!("Media cache worker stopped");
        }))
    }

    /// Traite une demande ; retourne `false` si elle a été ignorée
    async fn process(&self, request: DownloadRequest) -> bool {
        let DownloadRequest { id, target, .. } = request;

        let file_name = {
            let mut index = self.index.lock();
            match index.records.get_mut(&id) {
                Some(record) if record.status == CacheStatus::Pending => {
                    record.status = CacheStatus::Downloading;
                    record.file_name.clone()
                }
                _ => {
                    debug!(id = %id, "Download request no longer pending, skipped");
                    return false;
                }
            }
        };
        self.emit(CacheEvent::Status {
            id: id.clone(),
            status: CacheStatus::Downloading,
        });

        let final_path = self.dir.join(&file_name);
        let partial_path = self.dir.join(format!("{}{}", file_name, PARTIAL_SUFFIX));

        match self.download(&id, target, &partial_path, &final_path).await {
            Ok(size) => self.complete(&id, &final_path, size).await,
            Err(e) => {
                warn!(id = %id, "{}", e);
                let _ = tokio::fs::remove_file(&partial_path).await;
                self.set_status(&id, CacheStatus::Failed);
            }
        }
        true
    }

    async fn download(
        &self,
        id: &str,
        target: BoxFuture<'static, anyhow::Result<DownloadTarget>>,
        partial_path: &Path,
        final_path: &Path,
    ) -> Result<u64> {
        let target = target
            .await
            .map_err(|e| CacheError::Download(format!("{:#}", e)))?;
        info!(id = %id, url = %target.url, "Downloading media");
        let size = self
            .fetcher
            .fetch(&target, partial_path)
            .await
            .map_err(|e| CacheError::Download(format!("{:#}", e)))?;
        tokio::fs::rename(partial_path, final_path).await?;
        Ok(size)
    }

    async fn complete(&self, id: &str, path: &Path, size: u64) {
        let tracked = {
            let mut index = self.index.lock();
            let seq = index.next_seq();
            match index.records.get_mut(id) {
                Some(record) if record.status == CacheStatus::Downloading => {
                    record.status = CacheStatus::Ready;
                    record.size = size;
                    record.touch(seq);
                    index.total += size;
                    true
                }
                _ => false,
            }
        };

        if !tracked {
            // entrée supprimée pendant le téléchargement
            let _ = tokio::fs::remove_file(path).await;
            return;
        }

        info!(id = %id, size, "Media cached");
        self.emit(CacheEvent::Status {
            id: id.to_string(),
            status: CacheStatus::Ready,
        });

        let victims = self.collect_evictions();
        self.delete_files(&victims);
    }

    /// Retire de l'index les entrées READY les plus anciennes tant que la
    /// taille totale dépasse la limite ; retourne les fichiers à supprimer
    fn collect_evictions(&self) -> Vec<PathBuf> {
        let mut evicted: Vec<(String, PathBuf)> = Vec::new();
        {
            let mut index = self.index.lock();
            if index.total <= self.max_bytes {
                return Vec::new();
            }

            let mut candidates: Vec<(DateTime<Utc>, u64, String)> = index
                .records
                .values()
                .filter(|r| r.status == CacheStatus::Ready)
                .map(|r| (r.last_access, r.access_seq, r.id.clone()))
                .collect();
            candidates.sort();

            for (_, _, id) in candidates {
                if index.total <= self.max_bytes {
                    break;
                }
                if let Some(record) = index.records.remove(&id) {
                    index.total = index.total.saturating_sub(record.size);
                    info!(id = %record.id, size = record.size, "Evicting media file");
                    evicted.push((record.id, self.dir.join(record.file_name)));
                }
            }
        }

        evicted
            .into_iter()
            .map(|(id, path)| {
                self.emit(CacheEvent::Removed { id });
                path
            })
            .collect()
    }

    fn delete_files(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), "Cannot delete cached file: {}", e);
            }
        }
    }

    /// État d'une entrée
    pub fn status(&self, id: &str) -> Option<CacheStatus> {
        self.index.lock().records.get(id).map(|r| r.status)
    }

    /// Rafraîchit la date d'accès d'une entrée READY
    pub fn touch(&self, id: &str) -> bool {
        let mut index = self.index.lock();
        let seq = index.next_seq();
        match index.records.get_mut(id) {
            Some(record) if record.status == CacheStatus::Ready => {
                record.touch(seq);
                true
            }
            _ => false,
        }
    }

    /// URL locale (`/media/{fichier}`) d'une entrée READY ; compte comme un accès
    pub fn local_url(&self, id: &str) -> Option<String> {
        let mut index = self.index.lock();
        let seq = index.next_seq();
        match index.records.get_mut(id) {
            Some(record) if record.status == CacheStatus::Ready => {
                record.touch(seq);
                Some(format!("{}/{}", MEDIA_ROUTE, record.file_name))
            }
            _ => None,
        }
    }

    /// Chemin disque d'une entrée READY ; compte comme un accès
    pub fn local_path(&self, id: &str) -> Option<PathBuf> {
        let mut index = self.index.lock();
        let seq = index.next_seq();
        match index.records.get_mut(id) {
            Some(record) if record.status == CacheStatus::Ready => {
                record.touch(seq);
                Some(self.dir.join(&record.file_name))
            }
            _ => None,
        }
    }

    /// Chemin d'un fichier servi par nom (`{id}.{ext}`)
    pub fn path_for_file(&self, file_name: &str) -> Option<PathBuf> {
        if file_name.contains('/') || file_name.contains('\\') || file_name.starts_with('.') {
            return None;
        }
        let id = id_from_file_name(file_name);
        let mut index = self.index.lock();
        let seq = index.next_seq();
        match index.records.get_mut(id) {
            Some(record) if record.status == CacheStatus::Ready && record.file_name == file_name => {
                record.touch(seq);
                Some(self.dir.join(file_name))
            }
            _ => None,
        }
    }

    /// Nom de fichier qu'aura une entrée
    pub fn file_name(id: &str, extension: &str) -> String {
        file_name_for(id, extension)
    }

    /// Taille cumulée des entrées READY
    pub fn total_size(&self) -> u64 {
        self.index.lock().total
    }

    /// Copie de l'index, triée par identifiant
    pub fn records(&self) -> Vec<CacheRecord> {
        let mut records: Vec<_> = self.index.lock().records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Supprime une entrée et son fichier
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut index = self.index.lock();
            let removed = index.records.remove(id);
            if let Some(record) = &removed {
                if record.status == CacheStatus::Ready {
                    index.total = index.total.saturating_sub(record.size);
                }
            }
            removed
        };

        match removed {
            Some(record) => {
                if record.status == CacheStatus::Ready {
                    self.delete_files(&[self.dir.join(&record.file_name)]);
                }
                self.emit(CacheEvent::Removed { id: id.to_string() });
                true
            }
            None => false,
        }
    }

    /// Vide entièrement le cache
    ///
    /// Un téléchargement en cours se termine mais son fichier est supprimé.
    pub fn clear(&self) {
        let records: Vec<CacheRecord> = {
            let mut index = self.index.lock();
            index.total = 0;
            index.records.drain().map(|(_, r)| r).collect()
        };

        let files: Vec<PathBuf> = records
            .iter()
            .filter(|r| r.status == CacheStatus::Ready)
            .map(|r| self.dir.join(&r.file_name))
            .collect();
        self.delete_files(&files);

        info!(entries = records.len(), "Media cache cleared");
        for record in records {
            self.emit(CacheEvent::Removed { id: record.id });
        }
    }
}
