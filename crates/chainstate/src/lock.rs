use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;

use crate::error::ChainError;

pub const LOCK_FILE_NAME: &str = ".lock";

/// Exclusive advisory lock on a headers directory, released on drop.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
}

pub fn lock_headers_dir(dir: &Path) -> Result<DirLock, ChainError> {
    let lock_path = dir.join(LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();
            Ok(DirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let mut message = format!(
                "headers dir {} is already in use (lock file {})",
                dir.display(),
                lock_path.display()
            );
            if !holder.is_empty() {
                message.push_str(&format!(" ({holder})"));
            }
            Err(ChainError::DirectoryLocked(message))
        }
        Err(err) => Err(err.into()),
    }
}
