//! BLAKE3 content hashing with streaming support.
//!
//! # Overview
//!
//! Files are read in fixed [`BLOCK_SIZE`] blocks so memory stays flat for any
//! file size. Between blocks the hasher honours its [`WorkerControl`]: a pause
//! blocks until resumed, a stop abandons the file.
//!
//! [`Hasher::hash_file`] is the fallible form; [`Hasher::fingerprint`] is the
//! scanner's form, where a stop or an unreadable file simply yields `None`.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use super::HashError;
use crate::control::WorkerControl;

/// Read size for streaming hashes.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Streaming BLAKE3 hasher.
#[derive(Debug, Clone, Default)]
pub struct Hasher {
    control: Option<Arc<WorkerControl>>,
}

impl Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Honour `control` between blocks.
    #[must_use]
    pub fn with_control(mut self, control: Arc<WorkerControl>) -> Self {
        self.control = Some(control);
        self
    }

    /// Hash the contents of `path`.
    ///
    /// Returns `Ok(None)` when a stop was requested mid-file.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read.
    pub fn hash_file(&self, path: &Path) -> Result<Option<blake3::Hash>, HashError> {
        let mut file = File::open(path).map_err(|e| map_io_error(path, e))?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; BLOCK_SIZE];

        loop {
            if let Some(control) = &self.control {
                if !control.checkpoint() {
                    log::trace!("Hash of {} abandoned: stop requested", path.display());
                    return Ok(None);
                }
            }
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io_error(path, e)),
            };
            hasher.update(&buffer[..read]);
        }

        Ok(Some(hasher.finalize()))
    }

    /// Hex digest of `path`, or `None` on stop or I/O failure.
    #[must_use]
    pub fn fingerprint(&self, path: &Path) -> Option<String> {
        match self.hash_file(path) {
            Ok(hash) => hash.map(|h| h.to_hex().to_string()),
            Err(e) => {
                log::debug!("Skipping hash: {}", e);
                None
            }
        }
    }
}

fn map_io_error(path: &Path, error: io::Error) -> HashError {
    match error.kind() {
        io::ErrorKind::NotFound => HashError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => HashError::PermissionDenied(path.to_path_buf()),
        _ => HashError::Io {
            path: path.to_path_buf(),
            source: error,
        },
    }
}
