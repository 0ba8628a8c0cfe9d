use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::{KboxError, Result, Song};

/// Extension of song files inside the songs directory.
pub const SONG_EXTENSION: &str = "sng";

/// What a rebuild does with a song file that cannot be read or parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadRecordPolicy {
    /// Log the file and leave it out of the catalog.
    #[default]
    Skip,
    /// Abandon the whole rebuild.
    Fatal,
}

/// Immutable snapshot of every song found in one rebuild.
#[derive(Debug, Default)]
pub struct Catalog {
    songs: HashMap<String, Arc<Song>>,
    generation: u64,
}

impl Catalog {
    /// Wraps a fully built song table as the snapshot of `generation`.
    pub fn new(songs: HashMap<String, Arc<Song>>, generation: u64) -> Self {
        Self { songs, generation }
    }

    /// Returns the song stored under `key`, if any.
    pub fn lookup(&self, key: &str) -> Option<Arc<Song>> {
        self.songs.get(key).cloned()
    }

    /// Number of songs in the snapshot.
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    /// Returns `true` when the rebuild found no songs.
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    /// Keys in lexical order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.songs.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Reload cycle that produced this snapshot; 0 for the initial empty one.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Key under which the song in `file_name` is served: the directory joined
/// with the file's base name, always with `/` separators.
pub fn song_key(dir: &Path, file_name: &str) -> String {
    let base = file_name
        .strip_suffix(SONG_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .unwrap_or(file_name);
    let key = dir.join(base).to_string_lossy().into_owned();
    if std::path::MAIN_SEPARATOR == '/' {
        key
    } else {
        key.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Scans `dir` for song files and parses each into a fresh catalog.
///
/// Subdirectories and files with other extensions are ignored. Failing to
/// list `dir` is always an error; a bad song file is handled per `policy`.
pub fn rebuild(dir: &Path, policy: BadRecordPolicy, generation: u64) -> Result<Catalog> {
    let mut songs = HashMap::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            tracing::debug!(path = ?entry.path(), "skipping non UTF-8 file name");
            continue;
        };
        if Path::new(file_name).extension().and_then(|ext| ext.to_str()) != Some(SONG_EXTENSION) {
            continue;
        }

        let path = entry.path();
        match load_song(&path) {
            Ok(song) => {
                songs.insert(song_key(dir, file_name), Arc::new(song));
            }
            Err(err) => match policy {
                BadRecordPolicy::Skip => {
                    tracing::error!(error = %err, "skipping song file");
                }
                BadRecordPolicy::Fatal => return Err(err),
            },
        }
    }

    if songs.is_empty() {
        tracing::warn!(path = ?dir, records = 0, "no songs found");
    }

    Ok(Catalog::new(songs, generation))
}

fn load_song(path: &Path) -> Result<Song> {
    let text = fs::read_to_string(path)
        .map_err(|err| KboxError::invalid_record(path, KboxError::Io(err)))?;
    Song::from_text(&text).map_err(|err| KboxError::invalid_record(path, err))
}

/// Shared cell holding the current catalog. Readers take a snapshot and keep
/// using it while the reloader swaps in newer ones.
#[derive(Debug, Clone, Default)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<Catalog>>>,
}

impl CatalogHandle {
    /// Creates a handle holding the empty generation-0 catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot. It stays valid and unchanged however
    /// many swaps happen afterwards.
    pub fn snapshot(&self) -> Result<Arc<Catalog>> {
        Ok(self.read_current()?.clone())
    }

    /// Looks `key` up in the current snapshot.
    pub fn lookup(&self, key: &str) -> Result<Option<Arc<Song>>> {
        Ok(self.snapshot()?.lookup(key))
    }

    /// Looks up a request path such as `/show/songs/oh_darling`.
    pub fn lookup_path(&self, path: &str) -> Result<Option<Arc<Song>>> {
        self.lookup(path.strip_prefix('/').unwrap_or(path))
    }

    /// Publishes `catalog` unless a newer generation is already in place.
    /// Returns whether the swap happened.
    pub fn replace(&self, catalog: impl Into<Arc<Catalog>>) -> Result<bool> {
        let catalog = catalog.into();
        let mut current = self.write_current()?;
        if catalog.generation < current.generation {
            tracing::debug!(
                stale = catalog.generation,
                current = current.generation,
                "discarding out-of-order catalog"
            );
            return Ok(false);
        }
        *current = catalog;
        Ok(true)
    }

    fn read_current(&self) -> Result<RwLockReadGuard<'_, Arc<Catalog>>> {
        self.current
            .read()
            .map_err(|_| KboxError::msg("song catalog has been poisoned"))
    }

    fn write_current(&self) -> Result<RwLockWriteGuard<'_, Arc<Catalog>>> {
        self.current
            .write()
            .map_err(|_| KboxError::msg("song catalog has been poisoned"))
    }
}
