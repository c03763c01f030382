use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::color::{AlbumColors, Color};

/// One candidate rendition of an album's artwork. A dimension of 0 means unknown.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageCandidate {
    /// empty means there is no artwork
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub width: u32,
    #[serde(default, deserialize_with = "nullable")]
    pub height: u32,
}

/// `null` reads as the default value.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ImageCandidate {
    #[must_use]
    pub fn new(url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
        }
    }

    /// `None` if either dimension is unknown.
    #[must_use]
    pub fn area(&self) -> Option<u64> {
        (self.width != 0 && self.height != 0).then(|| u64::from(self.width) * u64::from(self.height))
    }
}

/// Pick the cheapest image to download: the smallest known area, ties going to the earliest.
///
/// Falls back to the first image when no image has both dimensions.
#[must_use]
pub fn smallest_image(images: &[ImageCandidate]) -> Option<&ImageCandidate> {
    let first = images.first()?;

    let smallest = images
        .iter()
        .filter_map(|image| Some((image.area()?, image)))
        .reduce(|best, next| if next.0 < best.0 { next } else { best })
        .map(|(_, image)| image);

    Some(smallest.unwrap_or(first))
}

/// A track as handed over by the playlist fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub album_id: String,
    pub images: Vec<ImageCandidate>,
    /// echoed back untouched in [`ProcessedTrack::track`]
    pub payload: Value,
}

impl TrackRecord {
    #[must_use]
    pub fn new(album_id: impl Into<String>, images: Vec<ImageCandidate>, payload: Value) -> Self {
        Self {
            album_id: album_id.into(),
            images,
            payload,
        }
    }

    /// Build a record from a spotify track object.
    ///
    /// <https://developer.spotify.com/documentation/web-api/reference/get-playlists-tracks>
    ///
    /// # Errors
    ///
    /// This function fails if `track` is not an object, has no album, or its album has no id and is
    /// not a local file.
    pub fn from_track(track: Value) -> anyhow::Result<Self> {
        // only the fields we need, the rest stays in the payload
        #[derive(Deserialize)]
        struct Track {
            album: Album,
            #[serde(default)]
            is_local: bool,
        }

        #[derive(Deserialize)]
        struct Album {
            #[serde(default)]
            id: Option<String>,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            images: Option<Vec<ImageCandidate>>,
        }

        if !track.is_object() {
            bail!("track is not an object");
        }

        let Track { album, is_local } =
            Track::deserialize(&track).context("track has no usable album")?;

        let album_id = match album.id {
            Some(id) if !id.is_empty() => id,
            _ if is_local => format!("local:{}", album.name.as_deref().unwrap_or_default()),
            _ => bail!("album has no id"),
        };

        Ok(Self {
            album_id,
            images: album.images.unwrap_or_default(),
            payload: track,
        })
    }
}

/// Parse a playlist tracks page (`{"items": [...]}`) or a bare array of playlist items.
///
/// Items whose `track` is `null` (removed or unavailable tracks) are skipped.
///
/// # Errors
///
/// This function fails if `input` is not json, has neither shape, or any item is malformed.
pub fn parse_tracks(input: &str) -> anyhow::Result<Vec<TrackRecord>> {
    let value: Value = serde_json::from_str(input).context("playlist payload is not json")?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut page) => match page.remove("items") {
            Some(Value::Array(items)) => items,
            // a lone item instead of a list
            Some(item @ Value::Object(_)) => vec![item],
            Some(other) => bail!("`items` was not a list: {other}"),
            None => bail!("playlist page has no `items`"),
        },
        other => bail!("expected a playlist page or a list of items, got {other}"),
    };

    let mut tracks = Vec::with_capacity(items.len());

    for (i, mut item) in items.into_iter().enumerate() {
        let track = item
            .get_mut("track")
            .map(Value::take)
            .ok_or_else(|| anyhow!("item {i} has no `track`"))?;

        if track.is_null() {
            debug!("skipping item {i}, track is null");
            continue;
        }

        tracks.push(TrackRecord::from_track(track).with_context(|| format!("item {i}"))?);
    }

    debug!("parsed {} tracks", tracks.len());

    Ok(tracks)
}

/// A track together with its album's colors.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedTrack {
    pub track: Value,
    pub average_color: Color,
    pub common_color: Color,
}

impl ProcessedTrack {
    #[must_use]
    pub fn new(track: Value, colors: AlbumColors) -> Self {
        Self {
            track,
            average_color: colors.average_color,
            common_color: colors.common_color,
        }
    }

    #[must_use]
    pub fn colors(&self) -> AlbumColors {
        AlbumColors {
            average_color: self.average_color,
            common_color: self.common_color,
        }
    }
}
