use std::fs::{File, OpenOptions};
use crate::core::error::{Error, Result};
use crate::storage::layout::StorageLayout;

/// Single owning process per store directory
pub struct FileLock {
    pub file: File,
}

impl FileLock {
    /// Non-blocking exclusive lock. Another live owner is a fatal store error.
    pub fn acquire(storage: &StorageLayout) -> Result<Self> {
        let lock_path = storage.lock_path();

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::fatal(format!("cannot open {}: {}", lock_path.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_EX, LOCK_NB};

            let fd = file.as_raw_fd();
            // SAFETY: fd belongs to `file`, which outlives this call
            let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
            if rc != 0 {
                return Err(Error::fatal(format!(
                    "store at {} is locked by another process",
                    storage.base_dir.display()
                )));
            }
        }

        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_UN};

            let fd = self.file.as_raw_fd();
            // SAFETY: fd is still open, owned by self.file
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}
