//! On-disk per-session scratch of decoded-ready segments.
//!
//! Layout contract: `<root>/master<id>/quality<bandwidth>/frag<index>.mp4`.
//! The whole root is swept at process start; a master's directory is wiped
//! when its session starts and removed when it finishes. Writes are not
//! atomic; concurrent saves of the same key produce content-identical
//! files, so the overwrite is benign.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    error::HlsResult,
    playlist::{MasterId, MasterPlaylist},
};

#[derive(Debug, Clone)]
pub struct FragmentCache {
    root: PathBuf,
}

impl FragmentCache {
    /// Cache rooted at `<tmp>/hls`.
    pub fn in_temp_dir() -> Self {
        Self::with_root(std::env::temp_dir().join("hls"))
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove leftovers of sessions that did not finish cleanly.
    ///
    /// Call once at process start, before any session exists.
    pub fn sweep_stale(&self) {
        if self.root.exists() {
            if let Err(e) = fs::remove_dir_all(&self.root) {
                warn!(root = %self.root.display(), error = %e, "stale cache sweep failed");
            }
        }
    }

    fn master_dir(&self, master_id: &MasterId) -> PathBuf {
        self.root.join(format!("master{master_id}"))
    }

    fn fragment_path(&self, master_id: &MasterId, bandwidth: u64, index: usize) -> PathBuf {
        self.master_dir(master_id)
            .join(format!("quality{bandwidth}"))
            .join(format!("frag{index}.mp4"))
    }

    /// Wipe and recreate the scratch for a starting session.
    pub fn prepare_session(&self, master: &MasterPlaylist) -> HlsResult<()> {
        let dir = self.master_dir(&master.id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        for variant in &master.variants {
            fs::create_dir_all(dir.join(format!("quality{}", variant.bandwidth)))?;
        }
        debug!(master = %master.id, dir = %dir.display(), "fragment cache prepared");
        Ok(())
    }

    /// Remove the scratch of a finished session.
    pub fn finish_session(&self, master_id: &MasterId) {
        let dir = self.master_dir(master_id);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "fragment cache cleanup failed");
            }
        }
    }

    /// Path of an already-persisted fragment, if present.
    pub fn get(&self, master_id: &MasterId, bandwidth: u64, index: usize) -> Option<PathBuf> {
        let path = self.fragment_path(master_id, bandwidth, index);
        path.is_file().then_some(path)
    }

    /// Persist fragment bytes and return the stored path.
    pub fn save(
        &self,
        master_id: &MasterId,
        bandwidth: u64,
        index: usize,
        data: &[u8],
    ) -> HlsResult<PathBuf> {
        let path = self.fragment_path(master_id, bandwidth, index);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use url::Url;

    use super::*;
    use crate::playlist::parse_master_playlist;

    fn master() -> MasterPlaylist {
        let base: Url = "http://127.0.0.1/s/master.m3u8".parse().unwrap();
        parse_master_playlist(
            "#EXTM3U\n\
             #EXT-X-STREAM-INF:BANDWIDTH=400000,RESOLUTION=640x360\n\
             hls_level_360.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720\n\
             hls_level_720.m3u8\n",
            &base,
        )
        .unwrap()
    }

    #[test]
    fn save_then_get_round_trips_path() {
        let tmp = TempDir::new().unwrap();
        let cache = FragmentCache::with_root(tmp.path().join("hls"));
        let master = master();
        cache.prepare_session(&master).unwrap();

        assert!(cache.get(&master.id, 1_500_000, 0).is_none());
        let path = cache.save(&master.id, 1_500_000, 0, b"segment-bytes").unwrap();
        assert_eq!(cache.get(&master.id, 1_500_000, 0), Some(path.clone()));
        assert_eq!(fs::read(path).unwrap(), b"segment-bytes");
    }

    #[test]
    fn prepare_wipes_previous_session_state() {
        let tmp = TempDir::new().unwrap();
        let cache = FragmentCache::with_root(tmp.path().join("hls"));
        let master = master();

        cache.prepare_session(&master).unwrap();
        cache.save(&master.id, 400_000, 3, b"old").unwrap();
        cache.prepare_session(&master).unwrap();
        assert!(cache.get(&master.id, 400_000, 3).is_none());
    }

    #[test]
    fn finish_removes_only_that_master() {
        let tmp = TempDir::new().unwrap();
        let cache = FragmentCache::with_root(tmp.path().join("hls"));
        let master = master();
        cache.prepare_session(&master).unwrap();
        cache.save(&master.id, 400_000, 0, b"x").unwrap();

        cache.finish_session(&master.id);
        assert!(cache.get(&master.id, 400_000, 0).is_none());
        // Removing an already-removed master is quiet.
        cache.finish_session(&master.id);
    }

    #[test]
    fn sweep_clears_the_whole_root() {
        let tmp = TempDir::new().unwrap();
        let cache = FragmentCache::with_root(tmp.path().join("hls"));
        let master = master();
        cache.prepare_session(&master).unwrap();
        cache.save(&master.id, 400_000, 0, b"x").unwrap();

        cache.sweep_stale();
        assert!(!cache.root().exists());
    }
}
