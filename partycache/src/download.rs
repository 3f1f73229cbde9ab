use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use tokio::io::AsyncWriteExt;

/// Emplacement distant à télécharger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl DownloadTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }
}

/// Demande de téléchargement
///
/// L'URL est fournie par un futur évalué par le worker juste avant le
/// téléchargement : les URL signées des plateformes expirent vite.
pub struct DownloadRequest {
    pub id: String,
    pub extension: String,
    pub(crate) target: BoxFuture<'static, anyhow::Result<DownloadTarget>>,
}

impl DownloadRequest {
    pub fn new<F>(id: impl Into<String>, extension: impl Into<String>, target: F) -> Self
    where
        F: Future<Output = anyhow::Result<DownloadTarget>> + Send + 'static,
    {
        Self {
            id: id.into(),
            extension: extension.into(),
            target: target.boxed(),
        }
    }

    pub fn from_url(
        id: impl Into<String>,
        extension: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let target = DownloadTarget::new(url);
        Self::new(id, extension, async move { Ok(target) })
    }
}

impl fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("id", &self.id)
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}

/// Récupère une ressource distante dans un fichier local
#[async_trait::async_trait]
pub trait Fetcher: fmt::Debug + Send + Sync {
    /// Écrit la ressource dans `dest` et retourne le nombre d'octets écrits
    async fn fetch(&self, target: &DownloadTarget, dest: &Path) -> anyhow::Result<u64>;
}

/// Téléchargement HTTP(S) via reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, target: &DownloadTarget, dest: &Path) -> anyhow::Result<u64> {
        let mut request = self.client.get(&target.url);
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {}", target.url))?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {}", response.status()));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create file: {}", dest.display()))?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read chunk")?;
            file.write_all(&chunk)
                .await
                .context("Failed to write to file")?;
            written += chunk.len() as u64;
        }

        file.flush().await.context("Failed to flush file")?;
        Ok(written)
    }
}
