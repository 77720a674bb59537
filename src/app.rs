//! Wiring and host-side run loops.
//!
//! The scheduler itself is collaborator-agnostic; this module is where
//! the real filesystem, the HTTP transport and the OS clock get plugged
//! in. It also owns the two ways of driving the loop on a host: a
//! background thread in real time, and a replay that simulates time so
//! an hour of audio takes seconds.

use crate::audio::AudioSource;
use crate::clock::{Clock, ManualClock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::events::EventSender;
use crate::scheduler::{Counters, Recorder};
use crate::storage::{FsStorage, Storage};
use crate::upload::{DrainReport, NetworkClient, UploadQueue};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(feature = "http")]
use crate::net::HttpNetwork;
#[cfg(not(feature = "http"))]
use crate::upload::OfflineNetwork;

/// Builds a recorder wired to the real filesystem and the configured
/// upload endpoint. LED, power source and event channel stay at their
/// defaults; chain the recorder's builders to replace them.
pub fn build_recorder(
    config: &Config,
    clock: Arc<dyn Clock>,
    audio: Box<dyn AudioSource>,
) -> Result<Recorder> {
    config.validate()?;
    let storage = FsStorage::new(config.storage.data_dir.clone());
    let net = make_network(config)?;
    Ok(Recorder::new(
        config.clone(),
        clock,
        audio,
        Box::new(storage),
        net,
    ))
}

#[cfg(feature = "http")]
fn make_network(config: &Config) -> Result<Box<dyn NetworkClient>> {
    Ok(Box::new(HttpNetwork::new(&config.upload)?))
}

#[cfg(not(feature = "http"))]
fn make_network(_config: &Config) -> Result<Box<dyn NetworkClient>> {
    Ok(Box::new(OfflineNetwork))
}

/// A recorder loop running on its own thread.
///
/// Dropping the handle without calling [`RecorderHandle::stop`] leaves
/// the thread running; it dies with the process.
pub struct RecorderHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Moves the recorder onto a background thread ticking at its
/// configured interval.
pub fn spawn(mut recorder: Recorder) -> RecorderHandle {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let interval = recorder.tick_interval();

    let thread = thread::spawn(move || {
        while flag.load(Ordering::SeqCst) {
            recorder.tick();
            thread::sleep(interval);
        }
    });

    RecorderHandle {
        running,
        thread: Some(thread),
    }
}

impl RecorderHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals the loop to stop and waits for the thread to wind down.
    ///
    /// Waits up to 2s; after that the thread is detached and dies with
    /// the process. A panic on the loop thread is reported on stderr.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);

        let Some(thread) = self.thread.take() else {
            return;
        };

        let deadline = Instant::now() + Duration::from_secs(2);
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                eprintln!("pendant: shutdown timeout, detaching recorder thread");
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }

        if let Err(panic_info) = thread.join() {
            let msg = panic_info
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                .unwrap_or("unknown panic");
            eprintln!("pendant: recorder thread panicked: {msg}");
        }
    }
}

/// Drives a recorder through a finite audio source without sleeping.
///
/// Each tick advances the manual clock by one tick interval, so silence
/// timeouts, upload gating and error cooldowns behave exactly as they
/// would in real time. The budget covers the whole source plus enough
/// slack to close a trailing session and run one upload pass.
///
/// The recorder must have been built with `clock`, otherwise simulated
/// time never moves for it.
pub fn replay(recorder: &mut Recorder, clock: &ManualClock, source_samples: usize) -> Counters {
    let frame_samples = recorder.config().audio.frame_samples.max(1);
    let tick_ms = recorder.config().audio.tick_interval_ms.max(1);
    let tick = Duration::from_millis(tick_ms);

    let source_ticks = source_samples.div_ceil(frame_samples) as u64;
    let grace = recorder.config().recording.silence_timeout_ms / tick_ms + 8;

    for _ in 0..1 + source_ticks + grace {
        recorder.tick();
        clock.advance(tick);
    }
    recorder.counters()
}

/// One upload pass over whatever is pending, outside the recorder loop.
pub fn sync_once(config: &Config, events: &EventSender) -> Result<DrainReport> {
    config.validate()?;
    let storage = FsStorage::new(config.storage.data_dir.clone());
    let net = make_network(config)?;
    let mut queue = UploadQueue::new(&config.upload);
    queue.drain(&storage, net.as_ref(), &SystemClock, events)
}

/// Recordings waiting for upload, oldest first, with their sizes.
pub fn pending_recordings(config: &Config) -> Result<Vec<(PathBuf, u64)>> {
    let storage = FsStorage::new(config.storage.data_dir.clone());
    let queue = UploadQueue::new(&config.upload);

    let mut out = Vec::new();
    for path in queue.pending(&storage)? {
        let size = storage.file_size(&path).unwrap_or(0);
        out.push((path, size));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockAudioSource;
    use crate::events::{self, RecorderEvent};
    use crate::scheduler::State;
    use crate::storage::MemoryStorage;
    use crate::upload::MockNetwork;

    fn quick_config() -> Config {
        let mut config = Config::default();
        config.vad.calibration_frames = 0;
        config
    }

    fn voice_frame() -> Vec<i16> {
        (0..256).map(|i| if i % 2 == 0 { 200 } else { -200 }).collect()
    }

    #[test]
    fn build_recorder_accepts_default_config() {
        let mut config = Config::default();
        config.storage.data_dir = std::env::temp_dir().join("pendant-app-test");

        let recorder = build_recorder(
            &config,
            Arc::new(SystemClock),
            Box::new(MockAudioSource::new()),
        );

        assert!(recorder.is_ok());
    }

    #[test]
    fn build_recorder_rejects_invalid_config() {
        let mut config = Config::default();
        config.upload.batch_size = 0;

        let result = build_recorder(
            &config,
            Arc::new(SystemClock),
            Box::new(MockAudioSource::new()),
        );

        assert!(result.is_err());
    }

    #[test]
    fn spawned_recorder_ticks_until_stopped() {
        let clock = ManualClock::new();
        let (tx, rx) = events::channel(64);
        let recorder = Recorder::new(
            quick_config(),
            Arc::new(clock),
            Box::new(MockAudioSource::new()),
            Box::new(MemoryStorage::new()),
            Box::new(MockNetwork::new()),
        )
        .with_events(tx);

        let handle = spawn(recorder);
        thread::sleep(Duration::from_millis(120));
        assert!(handle.is_running());
        handle.stop();

        let got: Vec<RecorderEvent> = rx.try_iter().collect();
        assert!(got.iter().any(|e| matches!(e, RecorderEvent::Calibrated { .. })));
        assert!(got.contains(&RecorderEvent::StateChanged {
            from: State::Init,
            to: State::Listening,
        }));
    }

    #[test]
    fn stop_is_idempotent_about_missing_thread() {
        let handle = RecorderHandle {
            running: Arc::new(AtomicBool::new(true)),
            thread: None,
        };
        handle.stop();
    }

    #[test]
    fn replay_records_and_uploads_a_burst() {
        let clock = ManualClock::new();
        let storage = MemoryStorage::new();
        let mut frames = vec![voice_frame(); 8];
        frames.resize(40, vec![0i16; 256]);
        let audio = MockAudioSource::new().with_frames(frames);

        let mut recorder = Recorder::new(
            quick_config(),
            Arc::new(clock.clone()),
            Box::new(audio),
            Box::new(storage.clone()),
            Box::new(MockNetwork::new()),
        );

        let counters = replay(&mut recorder, &clock, 40 * 256);

        assert_eq!(counters.recordings_finished, 1);
        assert_eq!(counters.uploads_succeeded, 1);
        assert_eq!(recorder.state(), State::Listening);
        assert!(storage.paths().iter().all(|p| p.starts_with("uploaded")));
    }

    #[test]
    fn replay_budget_covers_voice_running_to_the_last_sample() {
        let clock = ManualClock::new();
        let storage = MemoryStorage::new();
        // Voice on every queued frame; the session can only close via
        // the silence timeout inside the grace window.
        let audio = MockAudioSource::new()
            .with_frames(vec![voice_frame(); 20])
            .with_samples(vec![0i16; 256]);

        let mut recorder = Recorder::new(
            quick_config(),
            Arc::new(clock.clone()),
            Box::new(audio),
            Box::new(storage.clone()),
            Box::new(MockNetwork::new().with_connectivity(false)),
        );

        let counters = replay(&mut recorder, &clock, 20 * 256);

        assert_eq!(counters.recordings_started, 1);
        assert_eq!(counters.recordings_finished, 1);
    }
}
