//! Background upload of finished recordings.
//!
//! Finished WAV files wait under the recordings directory and are
//! pushed to the configured endpoint oldest-first. A file is only moved
//! to the uploaded directory after the server has accepted it, so a
//! crash or power loss can duplicate an upload but never lose one.

use crate::clock::Clock;
use crate::config::UploadConfig;
use crate::defaults;
use crate::error::{PendantError, Result};
use crate::events::{EventSender, RecorderEvent};
use crate::storage::Storage;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Request metadata sent alongside the file bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMeta<'a> {
    pub device_id: &'a str,
    /// Unix seconds at the time of the attempt.
    pub timestamp: u64,
    pub filename: &'a str,
}

/// What the server said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

impl UploadResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Short label for logs and events.
    pub fn category(&self) -> &'static str {
        match self.status {
            200..=299 => "accepted",
            400..=499 => "rejected by server",
            500..=599 => "server error",
            _ => "unexpected status",
        }
    }
}

/// Transport used to reach the upload endpoint.
pub trait NetworkClient: Send {
    /// Cheap reachability check, polled between files.
    fn is_connected(&self) -> bool;

    /// Posts one file. Transport failures are `Err`; HTTP error statuses
    /// are `Ok` with the status carried in the response.
    fn post_file(&self, meta: &UploadMeta<'_>, bytes: &[u8]) -> Result<UploadResponse>;
}

/// Transport for builds without an HTTP client. Always offline, so the
/// recorder keeps capturing and files pile up in the pending directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

impl NetworkClient for OfflineNetwork {
    fn is_connected(&self) -> bool {
        false
    }

    fn post_file(&self, _meta: &UploadMeta<'_>, _bytes: &[u8]) -> Result<UploadResponse> {
        Err(PendantError::UploadTransport {
            message: "no network transport in this build".to_string(),
        })
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub uploaded: usize,
    pub failed: usize,
    /// Connectivity was lost before the batch finished.
    pub aborted: bool,
}

/// Tracks upload attempts and moves files through the pending/uploaded
/// directories.
///
/// Retry counters live in memory. A restart gives every file a fresh
/// set of attempts.
pub struct UploadQueue {
    recordings_dir: PathBuf,
    uploaded_dir: PathBuf,
    device_id: String,
    batch_size: usize,
    max_retries: u32,
    attempts: HashMap<PathBuf, u32>,
    abandoned: HashSet<PathBuf>,
}

impl UploadQueue {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            recordings_dir: PathBuf::from(defaults::RECORDINGS_DIR),
            uploaded_dir: PathBuf::from(defaults::UPLOADED_DIR),
            device_id: config.device_id.clone(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            attempts: HashMap::new(),
            abandoned: HashSet::new(),
        }
    }

    /// WAV files waiting for upload, oldest first.
    ///
    /// Filenames embed their creation timestamp, so path order is
    /// creation order. Files past the retry ceiling are not listed.
    pub fn pending(&self, storage: &dyn Storage) -> Result<Vec<PathBuf>> {
        let files = storage
            .list_files(&self.recordings_dir)
            .map_err(|e| PendantError::StorageUnavailable {
                message: e.to_string(),
            })?;

        Ok(files
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "wav"))
            .filter(|p| !self.abandoned.contains(p))
            .collect())
    }

    pub fn has_pending(&self, storage: &dyn Storage) -> bool {
        self.pending(storage).map(|p| !p.is_empty()).unwrap_or(false)
    }

    pub fn attempts_for(&self, path: &Path) -> u32 {
        self.attempts.get(path).copied().unwrap_or(0)
    }

    pub fn abandoned_count(&self) -> usize {
        self.abandoned.len()
    }

    /// Uploads up to one batch of pending files.
    ///
    /// Stops early when connectivity drops; whatever already uploaded
    /// stays uploaded.
    pub fn drain(
        &mut self,
        storage: &dyn Storage,
        net: &dyn NetworkClient,
        clock: &dyn Clock,
        events: &EventSender,
    ) -> Result<DrainReport> {
        let batch: Vec<PathBuf> = self
            .pending(storage)?
            .into_iter()
            .take(self.batch_size)
            .collect();

        let mut report = DrainReport::default();
        for path in batch {
            if !net.is_connected() {
                report.aborted = true;
                break;
            }

            // A file that vanished between listing and reading is not an
            // upload failure; it just stops being pending.
            let bytes = match storage.read(&path) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };

            let timestamp = clock
                .wall()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let meta = UploadMeta {
                device_id: &self.device_id,
                timestamp,
                filename: &filename,
            };

            match net.post_file(&meta, &bytes) {
                Ok(response) if response.is_success() => {
                    report.uploaded += 1;
                    self.attempts.remove(&path);
                    match self.mark_done(storage, &path) {
                        Ok(()) => events.send(RecorderEvent::UploadSucceeded {
                            path: path.display().to_string(),
                            status: response.status,
                        }),
                        Err(e) => {
                            // The server has the file but the local move
                            // failed. Retrying would upload it twice, so
                            // the task is parked instead.
                            self.abandoned.insert(path.clone());
                            events.send(RecorderEvent::UploadInconsistent {
                                path: path.display().to_string(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
                Ok(response) => {
                    let detail =
                        format!("{} (status {})", response.category(), response.status);
                    self.record_failure(&path, detail, events);
                    report.failed += 1;
                }
                Err(e) => {
                    self.record_failure(&path, e.to_string(), events);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    fn record_failure(&mut self, path: &Path, detail: String, events: &EventSender) {
        let attempts = self.attempts.entry(path.to_path_buf()).or_insert(0);
        *attempts += 1;
        let attempts = *attempts;

        if attempts >= self.max_retries {
            self.attempts.remove(path);
            self.abandoned.insert(path.to_path_buf());
            events.send(RecorderEvent::UploadAbandoned {
                path: path.display().to_string(),
                attempts,
            });
        } else {
            events.send(RecorderEvent::UploadFailed {
                path: path.display().to_string(),
                attempts,
                detail,
            });
        }
    }

    /// Moves an accepted file into the uploaded directory, keeping its
    /// date subdirectory.
    fn mark_done(&self, storage: &dyn Storage, path: &Path) -> Result<()> {
        let tail = path
            .strip_prefix(&self.recordings_dir)
            .unwrap_or(path)
            .to_path_buf();
        let dest = self.uploaded_dir.join(tail);

        storage
            .rename(path, &dest)
            .map_err(|e| PendantError::MarkFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }
}

/// Scripted network for tests.
#[derive(Clone, Default)]
pub struct MockNetwork {
    inner: std::sync::Arc<std::sync::Mutex<MockNetworkInner>>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub device_id: String,
    pub timestamp: u64,
    pub filename: String,
    pub bytes: Vec<u8>,
}

enum ScriptedReply {
    Response(u16, String),
    TransportError(String),
}

struct MockNetworkInner {
    connected: bool,
    default_status: u16,
    scripted: std::collections::VecDeque<ScriptedReply>,
    posts_until_disconnect: Option<usize>,
    requests: Vec<RecordedRequest>,
}

impl Default for MockNetworkInner {
    fn default() -> Self {
        Self {
            connected: true,
            default_status: 200,
            scripted: std::collections::VecDeque::new(),
            posts_until_disconnect: None,
            requests: Vec::new(),
        }
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connectivity(self, connected: bool) -> Self {
        self.lock().connected = connected;
        self
    }

    /// Every unscripted post answers with this status.
    pub fn with_default_status(self, status: u16) -> Self {
        self.lock().default_status = status;
        self
    }

    /// Queues one response; scripted replies are consumed in order.
    pub fn with_response(self, status: u16, body: &str) -> Self {
        self.lock()
            .scripted
            .push_back(ScriptedReply::Response(status, body.to_string()));
        self
    }

    /// Queues one transport-level failure.
    pub fn with_transport_failure(self, message: &str) -> Self {
        self.lock()
            .scripted
            .push_back(ScriptedReply::TransportError(message.to_string()));
        self
    }

    /// Connectivity drops after this many successful post calls.
    pub fn with_disconnect_after(self, posts: usize) -> Self {
        self.lock().posts_until_disconnect = Some(posts);
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockNetworkInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl NetworkClient for MockNetwork {
    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn post_file(&self, meta: &UploadMeta<'_>, bytes: &[u8]) -> Result<UploadResponse> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(PendantError::UploadTransport {
                message: "not connected".to_string(),
            });
        }

        inner.requests.push(RecordedRequest {
            device_id: meta.device_id.to_string(),
            timestamp: meta.timestamp,
            filename: meta.filename.to_string(),
            bytes: bytes.to_vec(),
        });

        if let Some(remaining) = inner.posts_until_disconnect {
            let remaining = remaining.saturating_sub(1);
            inner.posts_until_disconnect = Some(remaining);
            if remaining == 0 {
                inner.connected = false;
            }
        }

        match inner.scripted.pop_front() {
            Some(ScriptedReply::Response(status, body)) => Ok(UploadResponse { status, body }),
            Some(ScriptedReply::TransportError(message)) => {
                Err(PendantError::UploadTransport { message })
            }
            None => Ok(UploadResponse {
                status: inner.default_status,
                body: String::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::events;
    use crate::storage::MemoryStorage;
    use std::time::Duration;

    fn queue_with(batch_size: usize, max_retries: u32) -> UploadQueue {
        let config = UploadConfig {
            batch_size,
            max_retries,
            device_id: "pendant-test".to_string(),
            ..UploadConfig::default()
        };
        UploadQueue::new(&config)
    }

    fn seed(storage: &MemoryStorage, name: &str) -> PathBuf {
        let path = PathBuf::from(name);
        storage.insert_file(path.clone(), format!("pcm:{name}").into_bytes());
        path
    }

    #[test]
    fn pending_lists_wav_files_oldest_first() {
        let storage = MemoryStorage::new();
        seed(&storage, "recordings/2026-08-23/REC_20260823_110000.wav");
        seed(&storage, "recordings/2026-08-22/REC_20260822_090000.wav");
        seed(&storage, "recordings/2026-08-23/notes.txt");

        let queue = queue_with(5, 3);
        let pending = queue.pending(&storage).unwrap();

        assert_eq!(
            pending,
            vec![
                PathBuf::from("recordings/2026-08-22/REC_20260822_090000.wav"),
                PathBuf::from("recordings/2026-08-23/REC_20260823_110000.wav"),
            ]
        );
    }

    #[test]
    fn drain_uploads_and_moves_to_uploaded_dir() {
        let storage = MemoryStorage::new();
        let path = seed(&storage, "recordings/2026-08-23/REC_20260823_110000.wav");
        let net = MockNetwork::new();
        let (tx, rx) = events::channel(16);

        let mut queue = queue_with(5, 3);
        let report = queue.drain(&storage, &net, &SystemClock, &tx).unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 0);
        assert!(!storage.exists(&path));
        assert!(storage.exists(Path::new("uploaded/2026-08-23/REC_20260823_110000.wav")));

        let sent = net.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].device_id, "pendant-test");
        assert_eq!(sent[0].filename, "REC_20260823_110000.wav");
        assert_eq!(sent[0].bytes, storage.file(Path::new("uploaded/2026-08-23/REC_20260823_110000.wav")).unwrap());

        let got: Vec<_> = rx.try_iter().collect();
        assert!(matches!(got[0], RecorderEvent::UploadSucceeded { .. }));
    }

    #[test]
    fn drain_stops_at_batch_size() {
        let storage = MemoryStorage::new();
        for hour in 0..7 {
            seed(&storage, &format!("recordings/2026-08-23/REC_20260823_0{hour}0000.wav"));
        }
        let net = MockNetwork::new();

        let mut queue = queue_with(5, 3);
        let report = queue
            .drain(&storage, &net, &SystemClock, &EventSender::sink())
            .unwrap();

        assert_eq!(report.uploaded, 5);
        assert_eq!(queue.pending(&storage).unwrap().len(), 2);
    }

    #[test]
    fn failures_count_attempts_and_abandon_at_ceiling() {
        let storage = MemoryStorage::new();
        let path = seed(&storage, "recordings/2026-08-23/REC_20260823_110000.wav");
        let net = MockNetwork::new().with_default_status(500);
        let (tx, rx) = events::channel(16);

        let mut queue = queue_with(5, 3);
        for expected in 1..=2u32 {
            queue.drain(&storage, &net, &SystemClock, &tx).unwrap();
            assert_eq!(queue.attempts_for(&path), expected);
        }
        queue.drain(&storage, &net, &SystemClock, &tx).unwrap();

        // Third failure hits the ceiling: file stays put but is no
        // longer pending.
        assert!(storage.exists(&path));
        assert!(queue.pending(&storage).unwrap().is_empty());
        assert_eq!(queue.abandoned_count(), 1);

        let got: Vec<_> = rx.try_iter().collect();
        assert!(matches!(got[0], RecorderEvent::UploadFailed { attempts: 1, .. }));
        assert!(matches!(got[1], RecorderEvent::UploadFailed { attempts: 2, .. }));
        assert!(matches!(got[2], RecorderEvent::UploadAbandoned { attempts: 3, .. }));
    }

    #[test]
    fn rejected_upload_detail_names_the_category() {
        let storage = MemoryStorage::new();
        seed(&storage, "recordings/2026-08-23/REC_20260823_110000.wav");
        let net = MockNetwork::new().with_response(400, "bad request");
        let (tx, rx) = events::channel(16);

        let mut queue = queue_with(5, 3);
        queue.drain(&storage, &net, &SystemClock, &tx).unwrap();

        match rx.try_iter().next().unwrap() {
            RecorderEvent::UploadFailed { detail, .. } => {
                assert_eq!(detail, "rejected by server (status 400)");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn transport_error_retries_on_next_drain() {
        let storage = MemoryStorage::new();
        let path = seed(&storage, "recordings/2026-08-23/REC_20260823_110000.wav");
        let net = MockNetwork::new().with_transport_failure("connection reset");

        let mut queue = queue_with(5, 3);
        let first = queue
            .drain(&storage, &net, &SystemClock, &EventSender::sink())
            .unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(queue.attempts_for(&path), 1);

        let second = queue
            .drain(&storage, &net, &SystemClock, &EventSender::sink())
            .unwrap();
        assert_eq!(second.uploaded, 1);
        assert_eq!(queue.attempts_for(&path), 0);
    }

    #[test]
    fn success_on_the_last_allowed_attempt_completes_the_file() {
        let storage = MemoryStorage::new();
        let path = seed(&storage, "recordings/2026-08-23/REC_20260823_110000.wav");
        // Two failures leave the file one attempt short of the ceiling.
        let net = MockNetwork::new()
            .with_response(500, "busy")
            .with_transport_failure("connection reset");

        let mut queue = queue_with(5, 3);
        for _ in 0..2 {
            let report = queue
                .drain(&storage, &net, &SystemClock, &EventSender::sink())
                .unwrap();
            assert_eq!(report.failed, 1);
        }
        assert_eq!(queue.attempts_for(&path), 2);
        assert_eq!(queue.abandoned_count(), 0);

        let third = queue
            .drain(&storage, &net, &SystemClock, &EventSender::sink())
            .unwrap();
        assert_eq!(third.uploaded, 1);
        assert!(storage.exists(Path::new(
            "uploaded/2026-08-23/REC_20260823_110000.wav"
        )));
        assert_eq!(queue.attempts_for(&path), 0);
    }

    #[test]
    fn mark_done_failure_after_accept_parks_the_task() {
        let storage = MemoryStorage::new().with_rename_failure();
        let path = seed(&storage, "recordings/2026-08-23/REC_20260823_110000.wav");
        let net = MockNetwork::new();
        let (tx, rx) = events::channel(16);

        let mut queue = queue_with(5, 3);
        let report = queue.drain(&storage, &net, &SystemClock, &tx).unwrap();

        assert_eq!(report.uploaded, 1);
        assert!(storage.exists(&path));
        // Not pending any more: retrying would double-upload.
        assert!(queue.pending(&storage).unwrap().is_empty());

        let got: Vec<_> = rx.try_iter().collect();
        assert!(matches!(got[0], RecorderEvent::UploadInconsistent { .. }));
    }

    #[test]
    fn connectivity_loss_mid_batch_aborts_the_rest() {
        let storage = MemoryStorage::new();
        for hour in 1..=3 {
            seed(&storage, &format!("recordings/2026-08-23/REC_20260823_0{hour}0000.wav"));
        }
        let net = MockNetwork::new().with_disconnect_after(1);

        let mut queue = queue_with(5, 3);
        let report = queue
            .drain(&storage, &net, &SystemClock, &EventSender::sink())
            .unwrap();

        assert_eq!(report.uploaded, 1);
        assert!(report.aborted);
        assert_eq!(queue.pending(&storage).unwrap().len(), 2);
        assert!(storage.exists(Path::new("uploaded/2026-08-23/REC_20260823_010000.wav")));
    }

    #[test]
    fn timestamp_header_comes_from_the_wall_clock() {
        let storage = MemoryStorage::new();
        seed(&storage, "recordings/2026-08-23/REC_20260823_110000.wav");
        let net = MockNetwork::new();
        let clock = ManualClock::starting_at(UNIX_EPOCH + Duration::from_secs(1_756_000_000));

        let mut queue = queue_with(5, 3);
        queue
            .drain(&storage, &net, &clock, &EventSender::sink())
            .unwrap();

        assert_eq!(net.requests()[0].timestamp, 1_756_000_000);
    }

    #[test]
    fn empty_queue_drains_to_nothing() {
        let storage = MemoryStorage::new();
        let net = MockNetwork::new();

        let mut queue = queue_with(5, 3);
        let report = queue
            .drain(&storage, &net, &SystemClock, &EventSender::sink())
            .unwrap();

        assert_eq!(report, DrainReport::default());
        assert!(!queue.has_pending(&storage));
    }
}
