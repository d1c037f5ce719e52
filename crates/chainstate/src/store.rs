//! Header files on disk: one main file for the best chain, one file per fork.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use spv_consensus::constants::{
    FORKS_DIR_NAME, FORK_FILE_PREFIX, HEADER_SIZE, MAIN_HEADERS_FILE_NAME,
};
use spv_consensus::{hash256_from_hex, hash256_to_hex, Hash256};
use spv_log::{log_error, log_warn};
use spv_primitives::sha256d;

const STAGING_SUFFIX: &str = ".tmp";

/// Identity encoded in a fork file name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForkFile {
    pub path: PathBuf,
    pub forkpoint: i32,
    pub prev_hash: Hash256,
    pub forkpoint_hash: Hash256,
}

/// File moves that exchange a child segment with its parent.
pub struct SwapFiles {
    /// The child's fork file; removed once the swap is complete.
    pub child_path: PathBuf,
    /// The parent's file, rewritten in place to hold the child's headers.
    pub parent_path: PathBuf,
    /// New fork file for the parent's displaced headers.
    pub demoted_path: PathBuf,
    /// Header index in `parent_path` where the child's headers start.
    pub parent_offset: i32,
    pub parent_tail: Vec<u8>,
    pub child_data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ChainStore {
    headers_dir: PathBuf,
    forks_dir: PathBuf,
}

impl ChainStore {
    pub fn open(headers_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let headers_dir = headers_dir.into();
        let forks_dir = headers_dir.join(FORKS_DIR_NAME);
        fs::create_dir_all(&forks_dir)?;
        Ok(Self {
            headers_dir,
            forks_dir,
        })
    }

    pub fn headers_dir(&self) -> &Path {
        &self.headers_dir
    }

    pub fn main_path(&self) -> PathBuf {
        self.headers_dir.join(MAIN_HEADERS_FILE_NAME)
    }

    pub fn fork_path(&self, forkpoint: i32, prev_hash: &Hash256, forkpoint_hash: &Hash256) -> PathBuf {
        self.forks_dir
            .join(fork_file_name(forkpoint, prev_hash, forkpoint_hash))
    }

    /// Number of whole headers in `path`; a missing file holds none.
    pub fn header_count(&self, path: &Path) -> std::io::Result<i32> {
        match fs::metadata(path) {
            Ok(metadata) => Ok((metadata.len() / HEADER_SIZE as u64) as i32),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err),
        }
    }

    pub fn read_header_bytes(
        &self,
        path: &Path,
        index: i32,
    ) -> std::io::Result<Option<[u8; HEADER_SIZE]>> {
        let data = self.read_range(path, index, 1)?;
        if data.len() != HEADER_SIZE {
            return Ok(None);
        }
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&data);
        Ok(Some(out))
    }

    /// Reads up to `count` headers starting at header `index`.
    pub fn read_range(&self, path: &Path, index: i32, count: i32) -> std::io::Result<Vec<u8>> {
        if index < 0 || count <= 0 {
            return Ok(Vec::new());
        }
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        file.seek(SeekFrom::Start(index as u64 * HEADER_SIZE as u64))?;
        let mut out = Vec::with_capacity(count as usize * HEADER_SIZE);
        file.take(count as u64 * HEADER_SIZE as u64)
            .read_to_end(&mut out)?;
        out.truncate(out.len() / HEADER_SIZE * HEADER_SIZE);
        Ok(out)
    }

    /// Writes `data` at header `index`; with `truncate`, anything past `index` is dropped first.
    ///
    /// A failed write leaves the file at its pre-write length.
    pub fn write_at(
        &self,
        path: &Path,
        index: i32,
        data: &[u8],
        truncate: bool,
    ) -> std::io::Result<()> {
        let offset = index as u64 * HEADER_SIZE as u64;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let previous_len = file.metadata()?.len();
        let rollback_len = if truncate {
            previous_len.min(offset)
        } else {
            previous_len
        };

        let result = (|| {
            if truncate && offset != previous_len {
                file.set_len(offset)?;
            }
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)?;
            file.flush()?;
            file.sync_all()
        })();

        if result.is_err() {
            let _ = file.set_len(rollback_len);
            let _ = file.sync_all();
        }
        result
    }

    pub fn create_empty(&self, path: &Path) -> std::io::Result<()> {
        let file = File::create(path)?;
        file.sync_all()
    }

    /// Extends `path` with zeroed records up to `count` headers.
    pub fn prefill(&self, path: &Path, count: i32) -> std::io::Result<()> {
        let target = count as u64 * HEADER_SIZE as u64;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < target {
            file.set_len(target)?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Drops everything from header `count` onward.
    pub fn truncate(&self, path: &Path, count: i32) -> std::io::Result<()> {
        let file = match OpenOptions::new().write(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        file.set_len(count.max(0) as u64 * HEADER_SIZE as u64)?;
        file.sync_all()
    }

    /// Drops a trailing partial record left by an interrupted append.
    pub fn truncate_partial_record(&self, path: &Path) -> std::io::Result<()> {
        let len = match fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        if len % HEADER_SIZE as u64 != 0 {
            self.truncate(path, (len / HEADER_SIZE as u64) as i32)?;
        }
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> std::io::Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Exchanges two segment files.
    ///
    /// The parent's tail is staged and synced before the parent file is rewritten,
    /// so an interrupted swap leaves a complete staging file that `recover_staged` can finish.
    ///
    /// On failure the parent's displaced tail is written back, so the files hold
    /// the pre-swap state again.
    pub fn swap_files(&self, swap: &SwapFiles) -> std::io::Result<()> {
        let staging = staging_path(&swap.demoted_path);
        let staged = (|| {
            let mut file = File::create(&staging)?;
            file.write_all(&swap.parent_tail)?;
            file.flush()?;
            file.sync_all()
        })();
        if let Err(err) = staged {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }

        let moved = self
            .write_at(&swap.parent_path, swap.parent_offset, &swap.child_data, true)
            .and_then(|()| fs::rename(&staging, &swap.demoted_path));
        if let Err(err) = moved {
            if let Err(restore) =
                self.write_at(&swap.parent_path, swap.parent_offset, &swap.parent_tail, true)
            {
                log_error!(
                    "Failed to restore {} after an aborted swap: {}",
                    swap.parent_path.display(),
                    restore
                );
                return Err(err);
            }
            let _ = fs::remove_file(&staging);
            return Err(err);
        }

        if swap.child_path != swap.demoted_path {
            if let Err(err) = self.remove(&swap.child_path) {
                // The child's headers now live in the parent file; a leftover copy is
                // dropped as redundant on the next open.
                log_warn!("Could not remove {}: {}", swap.child_path.display(), err);
            }
        }
        sync_dir(&self.forks_dir);
        Ok(())
    }

    /// Lists parseable fork files sorted by forkpoint, plus names that do not parse.
    pub fn list_forks(&self) -> std::io::Result<(Vec<ForkFile>, Vec<PathBuf>)> {
        let mut forks = Vec::new();
        let mut invalid = Vec::new();
        for entry in fs::read_dir(&self.forks_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(FORK_FILE_PREFIX) || name.contains('.') {
                continue;
            }
            match parse_fork_file_name(name) {
                Some((forkpoint, prev_hash, forkpoint_hash)) => forks.push(ForkFile {
                    path: entry.path(),
                    forkpoint,
                    prev_hash,
                    forkpoint_hash,
                }),
                None => invalid.push(entry.path()),
            }
        }
        forks.sort_by(|a, b| a.forkpoint.cmp(&b.forkpoint).then(a.path.cmp(&b.path)));
        Ok((forks, invalid))
    }

    /// Finishes or discards swaps interrupted before their staging file was renamed.
    ///
    /// Returns `(promoted, discarded)` staging files.
    pub fn recover_staged(&self) -> std::io::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut promoted = Vec::new();
        let mut discarded = Vec::new();
        for entry in fs::read_dir(&self.forks_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(final_name) = name.strip_suffix(STAGING_SUFFIX) else {
                continue;
            };
            let final_path = self.forks_dir.join(final_name);
            if !final_path.exists() && staged_file_is_complete(&path, final_name)? {
                fs::rename(&path, &final_path)?;
                promoted.push(final_path);
            } else {
                fs::remove_file(&path)?;
                discarded.push(path);
            }
        }
        if !promoted.is_empty() || !discarded.is_empty() {
            sync_dir(&self.forks_dir);
        }
        Ok((promoted, discarded))
    }
}

pub fn fork_file_name(forkpoint: i32, prev_hash: &Hash256, forkpoint_hash: &Hash256) -> String {
    format!(
        "{FORK_FILE_PREFIX}{forkpoint}_{}_{}",
        hash256_to_hex(prev_hash),
        hash256_to_hex(forkpoint_hash)
    )
}

/// Parses `fork2_<forkpoint>_<prev_hash>_<first_hash>`; short hashes are zero-padded.
pub fn parse_fork_file_name(name: &str) -> Option<(i32, Hash256, Hash256)> {
    let rest = name.strip_prefix(FORK_FILE_PREFIX)?;
    let mut parts = rest.split('_');
    let forkpoint = parts.next()?.parse::<i32>().ok()?;
    let prev_hash = hash256_from_hex(parts.next()?).ok()?;
    let forkpoint_hash = hash256_from_hex(parts.next()?).ok()?;
    if parts.next().is_some() || forkpoint < 1 {
        return None;
    }
    Some((forkpoint, prev_hash, forkpoint_hash))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

fn staged_file_is_complete(path: &Path, final_name: &str) -> std::io::Result<bool> {
    let Some((_, _, forkpoint_hash)) = parse_fork_file_name(final_name) else {
        return Ok(false);
    };
    let len = fs::metadata(path)?.len();
    if len == 0 || len % HEADER_SIZE as u64 != 0 {
        return Ok(false);
    }
    let mut first = [0u8; HEADER_SIZE];
    File::open(path)?.read_exact(&mut first)?;
    Ok(sha256d(&first) == forkpoint_hash)
}

fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
