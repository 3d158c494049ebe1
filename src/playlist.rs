//! Playlists and the files queued in them.

use crate::media::{
    probe::{FullMedia, ProbedInfo},
    StreamSelection,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub type PlaylistId = u64;
pub type FileId = u64;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedFile {
    pub id: FileId,
    pub playlist_id: PlaylistId,

    /// Local path or remote URL.
    pub mrl: String,

    pub position: usize,

    /// 0 to 100.
    pub played_percentage: f64,
    pub played_seconds: f64,

    /// Replay this file instead of advancing.
    pub loop_enabled: bool,

    pub probed_info: Option<ProbedInfo>,

    #[serde(default)]
    pub selection: StreamSelection,

    /// Decoded form of a remote URL.
    pub remote: Option<FullMedia>,

    #[serde(skip)]
    pub is_playing: bool,
}

impl QueuedFile {
    pub fn new(id: FileId, playlist_id: PlaylistId, mrl: impl Into<String>, position: usize)
    -> QueuedFile
    {
        QueuedFile {
            id,
            playlist_id,
            mrl: mrl.into(),
            position,
            played_percentage: 0.0,
            played_seconds: 0.0,
            loop_enabled: false,
            probed_info: None,
            selection: StreamSelection::default(),
            remote: None,
            is_playing: false,
        }
    }

    /// Total seconds, when known.
    pub fn duration(&self) -> Option<f64> {
        self.probed_info.as_ref().and_then(|i| i.duration)
            .or_else(|| self.remote.as_ref().and_then(|r| r.duration))
            .filter(|d| *d > 0.0)
    }

    pub fn was_played(&self) -> bool {
        self.played_percentage > 0.0 && self.played_percentage < 100.0
    }

    /// Record playback progress from a receiver status.
    pub fn update_progress(&mut self, current_time: f64, duration: Option<f64>) {
        self.played_seconds = current_time.max(0.0);
        if let Some(duration) = duration.filter(|d| *d > 0.0) {
            self.played_percentage = (current_time / duration * 100.0).clamp(0.0, 100.0);
        }
    }

    pub fn mark_finished(&mut self) {
        self.played_percentage = 100.0;
        if let Some(duration) = self.duration() {
            self.played_seconds = duration;
        }
    }

    pub fn reset_progress(&mut self) {
        self.played_percentage = 0.0;
        self.played_seconds = 0.0;
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    pub position: usize,
    pub loop_enabled: bool,
    pub shuffle: bool,
    pub files: Vec<QueuedFile>,
}

impl Playlist {
    pub fn new(id: PlaylistId, name: impl Into<String>, position: usize) -> Playlist {
        Playlist {
            id,
            name: name.into(),
            position,
            loop_enabled: false,
            shuffle: false,
            files: Vec::new(),
        }
    }

    pub fn index_of(&self, file_id: FileId) -> Option<usize> {
        self.files.iter().position(|f| f.id == file_id)
    }

    pub fn file(&self, file_id: FileId) -> Option<&QueuedFile> {
        self.files.iter().find(|f| f.id == file_id)
    }

    pub fn file_mut(&mut self, file_id: FileId) -> Option<&mut QueuedFile> {
        self.files.iter_mut().find(|f| f.id == file_id)
    }

    /// Append `mrls`, taking ids from `next_id`. Returns the new ids.
    pub fn add_files<I>(&mut self, mrls: I, mut next_id: impl FnMut() -> FileId) -> Vec<FileId>
    where I: IntoIterator<Item = String>
    {
        let mut ids = Vec::new();
        for mrl in mrls {
            let id = next_id();
            let position = self.files.len();
            self.files.push(QueuedFile::new(id, self.id, mrl, position));
            ids.push(id);
        }
        ids
    }

    pub fn remove_file(&mut self, file_id: FileId) -> Option<QueuedFile> {
        let idx = self.index_of(file_id)?;
        let removed = self.files.remove(idx);
        for (position, file) in self.files.iter_mut().enumerate() {
            file.position = position;
        }
        Some(removed)
    }

    /// Index to move to from `current`, honouring the shuffle and loop flags.
    pub fn next_index<R: Rng>(&self, current: usize, next: bool, rng: &mut R) -> Option<usize> {
        next_index(self.files.len(), current, next, self.loop_enabled, self.shuffle, rng)
    }
}

/// Navigation in a list of `len` files.
///
/// With `shuffle` a random index other than `current` is chosen, or `current`
/// itself when it is the only file. Otherwise the neighbour in the direction
/// of `next`, wrapping around only when `loop_enabled`.
pub fn next_index<R: Rng>(len: usize,
                          current: usize,
                          next: bool,
                          loop_enabled: bool,
                          shuffle: bool,
                          rng: &mut R)
-> Option<usize>
{
    if len == 0 {
        return None;
    }

    if shuffle {
        if len == 1 {
            return Some(0);
        }

        // Pick from the other len - 1 slots.
        let pick = rng.gen_range(0..len - 1);
        return Some(if pick >= current { pick + 1 } else { pick });
    }

    match (next, current) {
        (true, c) if c + 1 < len => Some(c + 1),
        (true, _) if loop_enabled => Some(0),
        (false, c) if c > 0 && c < len => Some(c - 1),
        (false, _) if loop_enabled => Some(len - 1),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn sequential_navigation() {
        let mut rng = SmallRng::seed_from_u64(1);

        assert_eq!(next_index(3, 2, true, true, false, &mut rng), Some(0));
        assert_eq!(next_index(3, 2, true, false, false, &mut rng), None);
        assert_eq!(next_index(3, 0, true, false, false, &mut rng), Some(1));
        assert_eq!(next_index(3, 0, false, false, false, &mut rng), None);
        assert_eq!(next_index(3, 0, false, true, false, &mut rng), Some(2));
        assert_eq!(next_index(0, 0, true, true, false, &mut rng), None);
    }

    #[test]
    fn shuffle_never_repeats_current() {
        let mut rng = SmallRng::seed_from_u64(7);

        for _ in 0..200 {
            let idx = next_index(4, 1, true, false, true, &mut rng).unwrap();
            assert!(idx < 4 && idx != 1);
        }

        for _ in 0..10 {
            assert_eq!(next_index(1, 0, true, false, true, &mut rng), Some(0));
        }
    }

    #[test]
    fn add_and_remove_renumbers() {
        let mut playlist = Playlist::new(1, "p", 0);
        let mut counter = 10;
        let ids = playlist.add_files(["a.mp4", "b.mp4", "c.mp4"].map(String::from),
                                     || { counter += 1; counter });
        assert_eq!(ids, [11, 12, 13]);

        playlist.remove_file(12).unwrap();
        let positions: Vec<_> = playlist.files.iter().map(|f| (f.id, f.position)).collect();
        assert_eq!(positions, [(11, 0), (13, 1)]);
    }

    #[test]
    fn progress() {
        let mut file = QueuedFile::new(1, 1, "/a.mp4", 0);
        file.probed_info = Some(ProbedInfo { duration: Some(200.0), ..ProbedInfo::default() });

        file.update_progress(50.0, file.duration());
        assert_eq!(file.played_percentage, 25.0);
        assert!(file.was_played());

        file.mark_finished();
        assert_eq!((file.played_percentage, file.played_seconds), (100.0, 200.0));
        assert!(!file.was_played());
    }
}
