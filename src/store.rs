//! Persistence of playlists and per-file playback state.

use async_trait::async_trait;
use crate::{
    error::Result,
    playlist::{Playlist, PlaylistId, QueuedFile},
    util::lock,
};
use std::{
    collections::HashMap,
    sync::Mutex,
};

#[async_trait]
pub trait PlaylistStore: Send + Sync {
    async fn load_playlists(&self) -> Result<Vec<Playlist>>;

    /// Persist progress and stream selection of one file.
    async fn save_file_state(&self, file: &QueuedFile) -> Result<()>;

    /// Persist a whole playlist after structural changes.
    async fn save_playlist(&self, playlist: &Playlist) -> Result<()>;

    async fn delete_playlist(&self, playlist: &Playlist) -> Result<()>;
}

/// Keeps everything in memory; the default when nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryPlaylistStore {
    playlists: Mutex<HashMap<PlaylistId, Playlist>>,
}

impl MemoryPlaylistStore {
    pub fn new() -> MemoryPlaylistStore {
        MemoryPlaylistStore::default()
    }

    pub fn with_playlists(playlists: Vec<Playlist>) -> MemoryPlaylistStore {
        MemoryPlaylistStore {
            playlists: Mutex::new(playlists.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    pub fn playlist(&self, id: PlaylistId) -> Option<Playlist> {
        lock(&self.playlists).get(&id).cloned()
    }
}

#[async_trait]
impl PlaylistStore for MemoryPlaylistStore {
    async fn load_playlists(&self) -> Result<Vec<Playlist>> {
        let mut playlists: Vec<Playlist> =
            lock(&self.playlists).values().cloned().collect();
        playlists.sort_by_key(|p| (p.position, p.id));
        Ok(playlists)
    }

    async fn save_file_state(&self, file: &QueuedFile) -> Result<()> {
        let mut playlists = lock(&self.playlists);
        if let Some(stored) = playlists.get_mut(&file.playlist_id)
                                      .and_then(|p| p.file_mut(file.id))
        {
            *stored = file.clone();
            stored.is_playing = false;
        }
        Ok(())
    }

    async fn save_playlist(&self, playlist: &Playlist) -> Result<()> {
        lock(&self.playlists).insert(playlist.id, playlist.clone());
        Ok(())
    }

    async fn delete_playlist(&self, playlist: &Playlist) -> Result<()> {
        lock(&self.playlists).remove(&playlist.id);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn file_state_round_trip() -> Result<()> {
        let mut playlist = Playlist::new(3, "films", 0);
        playlist.add_files(["/a.mp4".to_string()], || 9);
        let store = MemoryPlaylistStore::with_playlists(vec![playlist]);

        let mut file = store.load_playlists().await?[0].files[0].clone();
        file.played_percentage = 40.0;
        file.is_playing = true;
        store.save_file_state(&file).await?;

        let stored = store.playlist(3).unwrap();
        assert_eq!(stored.files[0].played_percentage, 40.0);
        assert!(!stored.files[0].is_playing);
        Ok(())
    }
}
