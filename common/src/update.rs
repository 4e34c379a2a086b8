//! Firmware image streaming into the platform's staging area.
//!
//! Nothing here touches the running image: bytes go to the target between
//! `begin` and `finalize`, and any early exit aborts the staged write.

use core::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};
use sha2::{Digest, Sha256};

use crate::{config::OtaConfig, error::UpdateError, version::is_newer};

pub const OTA_CHUNK_SIZE: usize = 4096;

/// The platform update primitive.
pub trait UpdateTarget {
    fn begin(&mut self, expected_size: Option<usize>) -> Result<(), UpdateError>;

    /// Returns the number of bytes accepted.
    fn write(&mut self, chunk: &[u8]) -> Result<usize, UpdateError>;

    fn finalize(&mut self) -> Result<(), UpdateError>;

    /// Discards whatever was staged. Must be safe to call at any point.
    fn abort(&mut self);
}

pub trait ChunkReader {
    /// Reads into `buf`, returning 0 at end of body.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, UpdateError>;
}

pub struct IoReader<R>(pub R);

impl<R: std::io::Read> ChunkReader for IoReader<R> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, UpdateError> {
        self.0
            .read(buf)
            .map_err(|err| UpdateError::Fetch(err.to_string()))
    }
}

pub struct Download<'a> {
    pub content_length: Option<usize>,
    pub body: Box<dyn ChunkReader + 'a>,
}

/// Remote side of the version check.
pub trait UpdateSource {
    fn fetch_text(&mut self, path: &str) -> Result<String, UpdateError>;

    fn open(&mut self, path: &str) -> Result<Download<'_>, UpdateError>;
}

#[derive(Debug, Default)]
struct GateState {
    busy: bool,
    staged: bool,
}

/// Serializes every writer of the staging area: the version check on the
/// controller thread and uploads on the HTTP server thread.
///
/// Once an image is staged nothing may write again until the node restarts
/// into it, since a new `begin` would erase the staged image.
#[derive(Debug, Clone, Default)]
pub struct UpdateGate(Arc<Mutex<GateState>>);

impl UpdateGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_claim(&self) -> Option<StagingClaim> {
        let mut state = self.state();
        if state.busy || state.staged {
            return None;
        }
        state.busy = true;
        Some(StagingClaim { gate: self.clone() })
    }

    pub fn restart_pending(&self) -> bool {
        self.state().staged
    }

    /// For restarts that keep memory, such as the desktop simulation.
    pub fn rebooted(&self) {
        self.state().staged = false;
    }
}

/// Exclusive use of the staging area, released on drop.
pub struct StagingClaim {
    gate: UpdateGate,
}

impl StagingClaim {
    pub fn mark_staged(self) {
        self.gate.state().staged = true;
    }
}

impl Drop for StagingClaim {
    fn drop(&mut self) {
        self.gate.state().busy = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReport {
    pub bytes: usize,
    pub sha256: String,
}

pub struct ImageWriter<'t> {
    target: &'t mut dyn UpdateTarget,
    hasher: Sha256,
    written: usize,
    expected: Option<usize>,
    open: bool,
}

impl<'t> ImageWriter<'t> {
    pub fn begin(
        target: &'t mut dyn UpdateTarget,
        expected: Option<usize>,
    ) -> Result<Self, UpdateError> {
        target.begin(expected)?;
        Ok(Self {
            target,
            hasher: Sha256::new(),
            written: 0,
            expected,
            open: true,
        })
    }

    pub fn write(&mut self, mut chunk: &[u8]) -> Result<(), UpdateError> {
        while !chunk.is_empty() {
            let accepted = self.target.write(chunk)?;
            if accepted == 0 {
                return Err(UpdateError::Write("target accepted no bytes".to_string()));
            }
            let accepted = accepted.min(chunk.len());
            self.hasher.update(&chunk[..accepted]);
            self.written = self.written.saturating_add(accepted);
            chunk = &chunk[accepted..];
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<ImageReport, UpdateError> {
        if self.written == 0 {
            return Err(UpdateError::Empty);
        }
        if let Some(expected) = self.expected.filter(|expected| *expected != self.written) {
            return Err(UpdateError::Truncated {
                expected,
                received: self.written,
            });
        }

        self.target.finalize()?;
        self.open = false;

        let digest = core::mem::take(&mut self.hasher).finalize();
        let mut sha256 = String::with_capacity(64);
        for byte in digest {
            let _ = write!(&mut sha256, "{byte:02x}");
        }

        Ok(ImageReport {
            bytes: self.written,
            sha256,
        })
    }
}

impl Drop for ImageWriter<'_> {
    fn drop(&mut self) {
        if self.open {
            warn!("aborting staged firmware write after {} bytes", self.written);
            self.target.abort();
        }
    }
}

pub fn copy_image(
    mut download: Download<'_>,
    target: &mut dyn UpdateTarget,
) -> Result<ImageReport, UpdateError> {
    let mut writer = ImageWriter::begin(target, download.content_length)?;
    let mut chunk = vec![0_u8; OTA_CHUNK_SIZE];

    loop {
        let read = download.body.read_chunk(&mut chunk)?;
        if read == 0 {
            break;
        }
        writer.write(&chunk[..read])?;
    }

    writer.finish()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate { remote: String },
    Installed { version: String, report: ImageReport },
    FetchFailed(UpdateError),
    WriteFailed(UpdateError),
}

pub fn check_for_update(
    source: &mut dyn UpdateSource,
    target: &mut dyn UpdateTarget,
    running: &str,
    ota: &OtaConfig,
) -> UpdateOutcome {
    let remote = match source.fetch_text(&ota.version_path) {
        Ok(text) => text.trim().to_string(),
        Err(err) => return UpdateOutcome::FetchFailed(err),
    };

    match is_newer(&remote, running) {
        None => UpdateOutcome::FetchFailed(UpdateError::BadVersion(remote)),
        Some(false) => UpdateOutcome::UpToDate { remote },
        Some(true) => {
            info!("firmware {remote} available (running {running}), downloading");
            let download = match source.open(&ota.bin_path) {
                Ok(download) => download,
                Err(err) => return UpdateOutcome::FetchFailed(err),
            };

            match copy_image(download, target) {
                Ok(report) => UpdateOutcome::Installed {
                    version: remote,
                    report,
                },
                Err(err) if err.is_fetch_failure() => UpdateOutcome::FetchFailed(err),
                Err(err) => UpdateOutcome::WriteFailed(err),
            }
        }
    }
}
