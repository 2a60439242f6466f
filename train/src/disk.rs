use std::{
    fs::{self, create_dir_all},
    io,
    path::{Path, PathBuf},
};

use alpha_chess::{error::RecordError, record::GameRecord};
use log::{info, warn};

const SELFPLAY_DIR: &str = "selfplay";
const ARENA_DIR: &str = "arena";
const ARCHIVE_DIR: &str = "archive";
const GENERATION_FILE: &str = "generation";
const INCUMBENT: &str = "incumbent.model";
const CANDIDATE: &str = "candidate.model";

/// Layout of the trainer's data directory.
///
/// ```text
/// generation          current generation number
/// incumbent.model     model generating self-play games
/// candidate.model     model under test in the arena, if any
/// selfplay/{i}.json   self-play window
/// arena/{i}.json      arena games of the candidate
/// archive/generation_{n}/
/// ```
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn open<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let data = DataDir {
            root: root.as_ref().to_path_buf(),
        };
        for dir in [data.selfplay_dir(), data.arena_dir(), data.archive_dir()] {
            create_dir_all(dir)?;
        }
        Ok(data)
    }

    pub fn incumbent(&self) -> PathBuf {
        self.root.join(INCUMBENT)
    }

    pub fn candidate(&self) -> PathBuf {
        self.root.join(CANDIDATE)
    }

    fn selfplay_dir(&self) -> PathBuf {
        self.root.join(SELFPLAY_DIR)
    }

    fn arena_dir(&self) -> PathBuf {
        self.root.join(ARENA_DIR)
    }

    fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    pub fn archive(&self, generation: u64) -> PathBuf {
        self.archive_dir().join(format!("generation_{generation}"))
    }

    pub fn selfplay_path(&self, slot: usize) -> PathBuf {
        self.selfplay_dir().join(format!("{slot}.json"))
    }

    pub fn arena_path(&self, slot: usize) -> PathBuf {
        self.arena_dir().join(format!("{slot}.json"))
    }

    pub fn generation(&self) -> io::Result<u64> {
        match fs::read_to_string(self.root.join(GENERATION_FILE)) {
            Ok(s) => s
                .trim()
                .parse()
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err),
        }
    }

    pub fn set_generation(&self, generation: u64) -> io::Result<()> {
        let path = self.root.join(GENERATION_FILE);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, format!("{generation}\n"))?;
        fs::rename(tmp, path)
    }

    /// Load the record in `path`. Missing and unreadable records count as
    /// absent; unreadable ones are deleted so the slot can be replayed.
    fn load(path: &Path) -> Result<Option<GameRecord>, RecordError> {
        if !path.exists() {
            return Ok(None);
        }
        match GameRecord::load(path) {
            Ok(record) => Ok(Some(record)),
            Err(RecordError::Json(err)) => {
                warn!("discarding corrupt record {}: {err}", path.display());
                fs::remove_file(path)?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// First slot below `count` without a finished game, with the partial
    /// game stored there.
    fn next_slot(
        &self,
        path: impl Fn(usize) -> PathBuf,
        count: usize,
    ) -> Result<Option<(usize, Option<GameRecord>)>, RecordError> {
        for slot in 0..count {
            match DataDir::load(&path(slot))? {
                Some(record) if record.is_complete() => continue,
                partial => return Ok(Some((slot, partial))),
            }
        }
        Ok(None)
    }

    pub fn next_selfplay_slot(&self, window: usize) -> Result<Option<(usize, Option<GameRecord>)>, RecordError> {
        self.next_slot(|slot| self.selfplay_path(slot), window)
    }

    pub fn next_arena_slot(&self, games: usize) -> Result<Option<(usize, Option<GameRecord>)>, RecordError> {
        self.next_slot(|slot| self.arena_path(slot), games)
    }

    fn finished(&self, path: impl Fn(usize) -> PathBuf, count: usize) -> Result<Vec<GameRecord>, RecordError> {
        let mut records = Vec::new();
        for slot in 0..count {
            if let Some(record) = DataDir::load(&path(slot))? {
                if record.is_complete() {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    pub fn selfplay_records(&self, window: usize) -> Result<Vec<GameRecord>, RecordError> {
        self.finished(|slot| self.selfplay_path(slot), window)
    }

    pub fn arena_records(&self, games: usize) -> Result<Vec<GameRecord>, RecordError> {
        self.finished(|slot| self.arena_path(slot), games)
    }

    pub fn has_arena_records(&self) -> io::Result<bool> {
        Ok(fs::read_dir(self.arena_dir())?.next().is_some())
    }

    pub fn clear_arena(&self) -> io::Result<()> {
        fs::remove_dir_all(self.arena_dir())?;
        create_dir_all(self.arena_dir())
    }

    /// Drop the `shift` oldest games of the window and move the rest down.
    pub fn shift_window(&self, window: usize, shift: usize) -> io::Result<()> {
        for slot in 0..shift.min(window) {
            let path = self.selfplay_path(slot);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        for slot in shift..window {
            let path = self.selfplay_path(slot);
            if path.exists() {
                fs::rename(path, self.selfplay_path(slot - shift))?;
            }
        }
        Ok(())
    }

    /// Move the self-play window into the archive of `generation`. Does
    /// nothing if that archive already exists or the window is empty.
    pub fn archive_window(&self, generation: u64) -> io::Result<()> {
        let archive = self.archive(generation);
        if archive.exists() || fs::read_dir(self.selfplay_dir())?.next().is_none() {
            return Ok(());
        }
        fs::rename(self.selfplay_dir(), &archive)?;
        info!("archived self-play window to {}", archive.display());
        create_dir_all(self.selfplay_dir())
    }
}
