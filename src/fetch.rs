use std::{future::Future, time::Duration};

use anyhow::{Context, anyhow};
use reqwest::Client;
use tracing::{debug, warn};

use crate::{
    color::{self, AlbumColors},
    tracks::ImageCandidate,
};

/// Somewhere artwork bytes can be downloaded from.
pub trait ImageSource: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

/// Downloads artwork over http(s). Any non-success status is an error.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: Client,
}

impl HttpImageSource {
    /// Every request, body included, is abandoned after `timeout`.
    ///
    /// # Errors
    ///
    /// This function fails if the http client could not be built.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;

        if !resp.status().is_success() {
            return Err(anyhow!("got {}", resp.status()));
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

/// Turns an [`ImageCandidate`] into [`AlbumColors`].
///
/// Never fails: a missing url, a failed download or an undecodable image all give
/// [`AlbumColors::NEUTRAL`].
#[derive(Debug)]
pub struct ImageFetcher<S> {
    source: S,
}

impl<S: ImageSource> ImageFetcher<S> {
    #[must_use]
    pub fn new(source: S) -> Self {
        Self { source }
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn colors(&self, image: Option<&ImageCandidate>) -> AlbumColors {
        let Some(image) = image.filter(|image| !image.url.is_empty()) else {
            debug!("no artwork, using neutral colors");
            return AlbumColors::NEUTRAL;
        };

        match self.try_colors(&image.url).await {
            Ok(colors) => colors,
            Err(err) => {
                warn!("failed to process image {}: {err:#}", image.url);
                AlbumColors::NEUTRAL
            }
        }
    }

    async fn try_colors(&self, url: &str) -> anyhow::Result<AlbumColors> {
        let bytes = self.source.fetch(url).await.context("fetching")?;
        debug!("fetched {} bytes from {url}", bytes.len());

        // decoding and scanning pixels is cpu bound
        tokio::task::spawn_blocking(move || -> anyhow::Result<AlbumColors> {
            let image = image::load_from_memory(&bytes).context("decoding")?;
            Ok(color::analyze(&image))
        })
        .await
        .context("analysis task failed")?
    }
}
