use std::{
    fs,
    io::{self, Read, Write},
    path::PathBuf,
};

use anyhow::Context;
use clap::{ArgAction, Parser};
use coverhue::{
    cache::{CacheBackend, ColorCache, MemoryBackend, RedisBackend},
    color::AlbumColors,
    config::Config,
    fetch::{HttpImageSource, ImageFetcher},
    pipeline::Orchestrator,
    tracks::{TrackRecord, parse_tracks},
};
use tracing::{Level, debug, info, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// A spotify playlist tracks page (or a list of its items) as json. Reads stdin if omitted or `-`.
    input: Option<PathBuf>,

    /// Where to write the tracks with their colors. Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Cache colors in this redis server instead of in memory.
    #[arg(long, env = "REDIS_URI")]
    redis_url: Option<String>,

    /// Most albums analyzed at once.
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds a cached album stays valid.
    #[arg(long)]
    ttl: Option<u64>,

    /// Seconds before an artwork download is abandoned.
    #[arg(long)]
    timeout: Option<u64>,

    /// Seconds before a redis round trip is abandoned and treated as a miss.
    #[arg(long)]
    cache_timeout: Option<u64>,

    /// Be a bit more verbose. Can be applied more than once (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.redis_url {
            config.redis_url = Some(url.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(ttl) = self.ttl {
            config.cache_ttl_secs = ttl;
        }
        if let Some(timeout) = self.timeout {
            config.fetch_timeout_secs = timeout;
        }
        if let Some(timeout) = self.cache_timeout {
            config.cache_timeout_secs = timeout;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        2..=u8::MAX => Level::TRACE,
    };

    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .without_time()
                .compact()
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(Targets::new().with_target("coverhue", filter))
        .with(indicatif_layer)
        .init();

    let mut config = Config::load_or_create().context("loading config")?;
    args.apply(&mut config);
    config.validate().context("invalid config")?;
    debug!("{config:?}");

    let input = match args.input.as_deref() {
        Some(path) if path.as_os_str() != "-" => fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        _ => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("reading stdin")?;
            input
        }
    };

    let tracks = parse_tracks(&input).context("parsing playlist")?;
    info!("got {} tracks", tracks.len());

    let fetcher = ImageFetcher::new(HttpImageSource::new(config.fetch_timeout())?);

    let output = if let Some(url) = &config.redis_url {
        info!("caching in redis");
        let backend = RedisBackend::new(url, config.cache_timeout())?;
        let cache = ColorCache::new(backend, config.cache_ttl());
        run(Orchestrator::new(cache, fetcher, config.workers), tracks).await?
    } else {
        info!("caching in memory, nothing will outlive this run");
        let cache = ColorCache::new(MemoryBackend::new(), config.cache_ttl());
        run(Orchestrator::new(cache, fetcher, config.workers), tracks).await?
    };

    if let Some(path) = &args.output {
        fs::write(path, output).with_context(|| format!("writing {}", path.display()))?;
    } else {
        let mut stdout = io::stdout().lock();
        stdout.write_all(output.as_bytes())?;
        stdout.write_all(b"\n")?;
    }

    Ok(())
}

/// Returns the pretty json of the processed tracks, once the cache write-back has finished.
async fn run<B: CacheBackend>(
    orchestrator: Orchestrator<B, HttpImageSource>,
    tracks: Vec<TrackRecord>,
) -> anyhow::Result<String> {
    let enrichment = orchestrator.process(tracks).await?;
    let output = serde_json::to_string_pretty(&enrichment.tracks)?;

    if !enrichment.write_back.is_empty() {
        debug!("waiting for cache write-back");
    }
    enrichment.write_back.wait().await;

    let neutral = enrichment
        .tracks
        .iter()
        .filter(|t| t.colors() == AlbumColors::NEUTRAL)
        .count();
    if neutral > 0 {
        warn!("{neutral} tracks got neutral colors");
    }

    Ok(output)
}
