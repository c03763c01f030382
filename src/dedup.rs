use std::collections::HashMap;

use crate::tracks::TrackRecord;

/// The distinct albums of a track list, in first-occurrence order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlbumIndex {
    /// distinct album ids
    pub keys: Vec<String>,
    /// for each key, the index of the first track that uses it
    pub first_track: Vec<usize>,
    /// for each track, the position of its album in `keys`
    pub slots: Vec<usize>,
}

impl AlbumIndex {
    #[must_use]
    pub fn new(tracks: &[TrackRecord]) -> Self {
        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(tracks.len());
        let mut index = Self {
            keys: Vec::new(),
            first_track: Vec::new(),
            slots: Vec::with_capacity(tracks.len()),
        };

        for (i, track) in tracks.iter().enumerate() {
            let slot = *positions.entry(&track.album_id).or_insert_with(|| {
                index.keys.push(track.album_id.clone());
                index.first_track.push(i);
                index.keys.len() - 1
            });
            index.slots.push(slot);
        }

        index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Spread one value per album back out to one value per track.
    ///
    /// # Panics
    ///
    /// Will panic if `per_album` is shorter than [`Self::len`].
    #[must_use]
    pub fn broadcast<T: Clone>(&self, per_album: &[T]) -> Vec<T> {
        self.slots.iter().map(|&slot| per_album[slot].clone()).collect()
    }
}
