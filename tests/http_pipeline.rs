use std::{
    collections::HashMap,
    io::Cursor,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use coverhue::{
    cache::{ColorCache, MemoryBackend},
    color::{AlbumColors, Color},
    fetch::{HttpImageSource, ImageFetcher},
    pipeline::Orchestrator,
    tracks::parse_tracks,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn solid_png(color: [u8; 3]) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb(color)))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// A one-file http server: `/red.png`, `/blue.png`, `/garbage`, `/slow` and 404 for the rest.
struct ArtServer {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl ArtServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(Mutex::new(HashMap::new()));

        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let counter = counter.clone();

                tokio::spawn(async move {
                    let mut request: Vec<u8> = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }

                    let request = String::from_utf8_lossy(&request);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    *counter.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

                    let (status, body) = match path.as_str() {
                        "/red.png" => ("200 OK", solid_png([255, 0, 0])),
                        "/blue.png" => ("200 OK", solid_png([0, 0, 255])),
                        "/garbage" => ("200 OK", b"<html>not an image</html>".to_vec()),
                        "/slow" => {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            ("200 OK", solid_png([0, 255, 0]))
                        }
                        _ => ("404 Not Found", Vec::new()),
                    };

                    let head = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: image/png\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(&body).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { addr, hits }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

fn orchestrator(timeout: Duration) -> Orchestrator<MemoryBackend, HttpImageSource> {
    Orchestrator::new(
        ColorCache::new(MemoryBackend::new(), DAY),
        // a proxy from the environment must not intercept loopback requests
        ImageFetcher::new(HttpImageSource::with_client(
            reqwest::Client::builder()
                .no_proxy()
                .timeout(timeout)
                .build()
                .unwrap(),
        )),
        4,
    )
}

fn item(track_id: &str, album_id: &str, images: serde_json::Value) -> serde_json::Value {
    json!({
        "track": {
            "id": track_id,
            "name": format!("song {track_id}"),
            "album": { "id": album_id, "name": "album", "images": images }
        }
    })
}

#[tokio::test]
async fn shared_red_album_is_downloaded_once() {
    let server = ArtServer::start().await;

    let images = json!([
        { "url": server.url("/huge.png"), "width": 640, "height": 640 },
        { "url": server.url("/red.png"), "width": 64, "height": 64 }
    ]);
    let page = json!({ "items": [item("1", "X", images.clone()), item("2", "X", images)] });
    let tracks = parse_tracks(&page.to_string()).unwrap();

    let orchestrator = orchestrator(Duration::from_secs(5));
    let enrichment = orchestrator.process(tracks).await.unwrap();

    let output = serde_json::to_value(&enrichment.tracks).unwrap();
    assert_eq!(output.as_array().unwrap().len(), 2);
    for (processed, id) in output.as_array().unwrap().iter().zip(["1", "2"]) {
        assert_eq!(processed["track"]["id"], id);
        assert_eq!(processed["averageColor"], "#ff0000");
        // the dominant color is the quantized bucket of 255
        assert_eq!(processed["commonColor"], "#f80000");
    }

    assert_eq!(server.hits("/red.png"), 1);
    assert_eq!(server.hits("/huge.png"), 0);

    enrichment.write_back.wait().await;
    let cached = orchestrator.cache().get(&["X".to_string()]).await;
    assert_eq!(
        cached,
        [Some(AlbumColors {
            average_color: Color::new(255, 0, 0),
            common_color: Color::new(248, 0, 0),
        })]
    );
}

#[tokio::test]
async fn bad_artwork_is_neutral() {
    let server = ArtServer::start().await;

    let page = json!([
        item("1", "missing", json!([{ "url": server.url("/nope.png"), "width": 64, "height": 64 }])),
        item("2", "garbage", json!([{ "url": server.url("/garbage"), "width": 64, "height": 64 }])),
        item("3", "blue", json!([{ "url": server.url("/blue.png"), "width": null, "height": null }])),
        item("4", "none", json!([])),
    ]);
    let tracks = parse_tracks(&page.to_string()).unwrap();

    let enrichment = orchestrator(Duration::from_secs(5)).process(tracks).await.unwrap();
    let colors: Vec<AlbumColors> = enrichment.tracks.iter().map(|t| t.colors()).collect();

    assert_eq!(colors[0], AlbumColors::NEUTRAL);
    assert_eq!(colors[1], AlbumColors::NEUTRAL);
    assert_eq!(colors[2].average_color, Color::new(0, 0, 255));
    assert_eq!(colors[3], AlbumColors::NEUTRAL);

    assert_eq!(server.hits("/nope.png"), 1);
    assert_eq!(server.hits("/garbage"), 1);
}

#[tokio::test]
async fn slow_artwork_times_out() {
    let server = ArtServer::start().await;

    let page = json!([item("1", "slow", json!([{ "url": server.url("/slow"), "width": 1, "height": 1 }]))]);
    let tracks = parse_tracks(&page.to_string()).unwrap();

    let start = Instant::now();
    let enrichment = orchestrator(Duration::from_millis(500))
        .process(tracks)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(4));
    assert_eq!(enrichment.tracks[0].colors(), AlbumColors::NEUTRAL);
}
