use std::{collections::HashMap, sync::Arc, time::Instant};

use anyhow::bail;
use indicatif::ProgressStyle;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, Span, debug, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::{
    cache::{CacheBackend, ColorCache},
    color::AlbumColors,
    dedup::AlbumIndex,
    fetch::{ImageFetcher, ImageSource},
    tracks::{ImageCandidate, ProcessedTrack, TrackRecord, smallest_image},
};

/// Adds album colors to track lists, computing each album at most once per call and caching the
/// results.
pub struct Orchestrator<B, S> {
    cache: Arc<ColorCache<B>>,
    fetcher: Arc<ImageFetcher<S>>,
    workers: usize,
}

/// The result of [`Orchestrator::process`].
#[derive(Debug)]
pub struct Enrichment {
    /// one per input track, in input order
    pub tracks: Vec<ProcessedTrack>,
    pub write_back: WriteBack,
}

/// The background task writing freshly computed colors to the cache.
///
/// Dropping this leaves the task running.
#[derive(Debug)]
pub struct WriteBack(Option<JoinHandle<()>>);

impl WriteBack {
    fn none() -> Self {
        Self(None)
    }

    /// `true` if there was nothing new to cache.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Wait for the write to finish. Failures were already logged by the task.
    pub async fn wait(self) {
        let Some(handle) = self.0 else {
            return;
        };

        if let Err(err) = handle.await {
            warn!("cache write-back task failed: {err}");
        }
    }
}

/// One album to compute: its slot in the [`AlbumIndex`] and the image to use.
type Job = (usize, Option<ImageCandidate>);

impl<B: CacheBackend, S: ImageSource> Orchestrator<B, S> {
    /// `workers` is the most albums analyzed at once. Values below 1 are treated as 1.
    #[must_use]
    pub fn new(cache: ColorCache<B>, fetcher: ImageFetcher<S>, workers: usize) -> Self {
        Self {
            cache: Arc::new(cache),
            fetcher: Arc::new(fetcher),
            workers: workers.max(1),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ColorCache<B> {
        &self.cache
    }

    #[must_use]
    pub fn fetcher(&self) -> &ImageFetcher<S> {
        &self.fetcher
    }

    /// Resolve colors for every track in `tracks`.
    ///
    /// Cached albums are used as is, the rest are fetched and analyzed once each, concurrently.
    /// New colors are written back in the background; see [`Enrichment::write_back`].
    ///
    /// # Errors
    ///
    /// This function fails if a track has an empty album id. Fetch, decode and cache failures
    /// never fail the call.
    pub async fn process(&self, tracks: Vec<TrackRecord>) -> anyhow::Result<Enrichment> {
        let start = Instant::now();

        if let Some(i) = tracks.iter().position(|t| t.album_id.is_empty()) {
            bail!("track {i} has no album id");
        }

        let index = AlbumIndex::new(&tracks);
        info!("{} tracks, {} albums", tracks.len(), index.len());

        let mut resolved = self.cache.get(&index.keys).await;

        let jobs: Vec<Job> = resolved
            .iter()
            .enumerate()
            .filter(|(_, hit)| hit.is_none())
            .map(|(slot, _)| {
                let images = &tracks[index.first_track[slot]].images;
                (slot, smallest_image(images).cloned())
            })
            .collect();

        info!(
            "{} albums cached, {} to analyze",
            index.len() - jobs.len(),
            jobs.len()
        );

        let fresh = self.analyze(jobs).await;

        let mut updates = HashMap::with_capacity(fresh.len());
        for (slot, colors) in fresh {
            resolved[slot] = Some(colors);
            updates.insert(index.keys[slot].clone(), colors);
        }

        let per_album: Vec<AlbumColors> = resolved
            .into_iter()
            .enumerate()
            .map(|(slot, colors)| {
                colors.unwrap_or_else(|| {
                    warn!("album `{}` was never resolved", index.keys[slot]);
                    AlbumColors::NEUTRAL
                })
            })
            .collect();

        let tracks = tracks
            .into_iter()
            .zip(index.broadcast(&per_album))
            .map(|(track, colors)| ProcessedTrack::new(track.payload, colors))
            .collect();

        let write_back = self.write_back(updates);

        info!("processed in {:?}", start.elapsed());

        Ok(Enrichment { tracks, write_back })
    }

    /// Run every job on the worker pool, returning `(slot, colors)` for each one that finished.
    async fn analyze(&self, jobs: Vec<Job>) -> Vec<(usize, AlbumColors)> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let expected = jobs.len();
        let workers = self.workers.min(expected);

        let (jobs_tx, jobs_rx) = async_channel::bounded(workers);
        let (results_tx, mut results_rx) = mpsc::channel(expected);

        tokio::spawn(async move {
            for job in jobs {
                if jobs_tx.send(job).await.is_err() {
                    warn!("every analyzer stopped early");
                    return;
                }
            }
        });

        let pb_span = info_span!("analysis");
        if let Ok(style) = ProgressStyle::with_template("{wide_bar} {pos}/{len}") {
            pb_span.pb_set_style(&style);
        }
        pb_span.pb_set_length(expected as u64);
        pb_span.pb_start();

        debug!("analyzing with {workers} workers");

        let mut handles = Vec::with_capacity(workers);
        for task in 0..workers {
            let jobs = jobs_rx.clone();
            let results = results_tx.clone();
            let fetcher = self.fetcher.clone();

            let handle = tokio::spawn(
                async move {
                    while let Ok((slot, image)) = jobs.recv().await {
                        let colors = fetcher.colors(image.as_ref()).await;
                        if results.send((slot, colors)).await.is_err() {
                            return;
                        }
                    }
                    debug!("no more albums");
                }
                .instrument(info_span!("analyzer", id = task + 1)),
            );
            handles.push(handle);
        }
        // workers hold the only channel ends now, so the loop below ends when they do
        drop(jobs_rx);
        drop(results_tx);

        let mut fresh = Vec::with_capacity(expected);
        async {
            while let Some(result) = results_rx.recv().await {
                Span::current().pb_inc(1);
                fresh.push(result);
            }
        }
        .instrument(pb_span)
        .await;

        for handle in handles {
            if let Err(err) = handle.await {
                warn!("an analyzer failed: {err}");
            }
        }

        if fresh.len() != expected {
            warn!("only {}/{expected} albums were analyzed", fresh.len());
        }

        fresh
    }

    fn write_back(&self, updates: HashMap<String, AlbumColors>) -> WriteBack {
        if updates.is_empty() {
            return WriteBack::none();
        }

        let cache = self.cache.clone();
        let handle = tokio::spawn(
            async move {
                if let Err(err) = cache.set(&updates).await {
                    warn!("failed to cache {} albums: {err:#}", updates.len());
                }
            }
            .instrument(info_span!("write_back")),
        );

        WriteBack(Some(handle))
    }
}
