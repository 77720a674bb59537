//! Tick-driven recorder state machine.
//!
//! The scheduler runs one state handler per tick and owns every
//! collaborator: audio in, storage, network, LED, battery. Collaborators
//! are trait objects so the whole machine runs against mocks with a
//! manual clock, which is how the tests below exercise timeouts and
//! recovery without sleeping.
//!
//! State flow:
//!
//! ```text
//! Init -> Listening <-> Recording
//!           |    \________ Uploading
//!           |____________ Maintenance
//! (any) -> Error -> Init        (after cooldown)
//! ```

use crate::audio::AudioSource;
use crate::clock::Clock;
use crate::config::{Config, RecoveryPolicy};
use crate::defaults;
use crate::error::{Fault, PendantError, Result};
use crate::events::{EventSender, RecorderEvent};
use crate::led::{LedMode, NullLed, StatusLed};
use crate::power::{ConstPower, PowerMonitor};
use crate::recording::RecordingSession;
use crate::storage::Storage;
use crate::upload::{NetworkClient, UploadQueue};
use crate::vad::Vad;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The scheduler's current state. Exactly one handler runs per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Init,
    Listening,
    Recording,
    Uploading,
    Maintenance,
    Error,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Init => "init",
            State::Listening => "listening",
            State::Recording => "recording",
            State::Uploading => "uploading",
            State::Maintenance => "maintenance",
            State::Error => "error",
        }
    }
}

/// Running totals, readable at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub ticks: u64,
    pub recordings_started: u64,
    pub recordings_finished: u64,
    pub recordings_refused: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub maintenance_passes: u64,
    pub errors: u32,
}

/// The recorder core: VAD, sessions, uploads and maintenance, advanced
/// one cooperative tick at a time.
pub struct Recorder {
    config: Config,
    clock: Arc<dyn Clock>,
    audio: Box<dyn AudioSource>,
    storage: Box<dyn Storage>,
    net: Box<dyn NetworkClient>,
    led: Box<dyn StatusLed>,
    power: Box<dyn PowerMonitor>,
    events: EventSender,

    state: State,
    vad: Vad,
    queue: UploadQueue,
    session: Option<RecordingSession>,
    counters: Counters,

    last_fault: Option<Fault>,
    error_entered_at: Option<Instant>,
    recovery_halt_reported: bool,

    last_voice_at: Option<Instant>,
    last_periodic_check: Option<Instant>,

    last_battery_poll: Option<Instant>,
    battery_percent: f32,
    usb_powered: bool,
    low_battery_reported: bool,
    battery_refusal_reported: bool,

    was_connected: Option<bool>,
    last_led: Option<LedMode>,
}

impl Recorder {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        audio: Box<dyn AudioSource>,
        storage: Box<dyn Storage>,
        net: Box<dyn NetworkClient>,
    ) -> Self {
        let vad = Vad::with_clock(config.vad.clone(), Arc::clone(&clock));
        let queue = UploadQueue::new(&config.upload);
        Self {
            config,
            clock,
            audio,
            storage,
            net,
            led: Box::new(NullLed),
            power: Box::new(ConstPower::mains()),
            events: EventSender::sink(),
            state: State::Init,
            vad,
            queue,
            session: None,
            counters: Counters::default(),
            last_fault: None,
            error_entered_at: None,
            recovery_halt_reported: false,
            last_voice_at: None,
            last_periodic_check: None,
            last_battery_poll: None,
            battery_percent: 100.0,
            usb_powered: false,
            low_battery_reported: false,
            battery_refusal_reported: false,
            was_connected: None,
            last_led: None,
        }
    }

    pub fn with_led(mut self, led: Box<dyn StatusLed>) -> Self {
        self.led = led;
        self
    }

    pub fn with_power(mut self, power: Box<dyn PowerMonitor>) -> Self {
        self.power = power;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn last_fault(&self) -> Option<Fault> {
        self.last_fault
    }

    pub fn is_session_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn noise_floor(&self) -> f32 {
        self.vad.noise_floor()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.audio.tick_interval_ms)
    }

    /// Runs exactly one state handler and refreshes the LED.
    pub fn tick(&mut self) {
        self.counters.ticks += 1;
        self.poll_battery();
        self.update_led();

        match self.state {
            State::Init => self.tick_init(),
            State::Listening => self.tick_listening(),
            State::Recording => self.tick_recording(),
            State::Uploading => self.tick_uploading(),
            State::Maintenance => self.tick_maintenance(),
            State::Error => self.tick_error(),
        }

        self.update_led();
    }

    // ---- state handlers ----

    fn tick_init(&mut self) {
        let dirs = [defaults::RECORDINGS_DIR, defaults::UPLOADED_DIR];
        for dir in dirs {
            if self.storage.create_dir_all(dir.as_ref()).is_err() {
                self.enter_error(Fault::StorageInit);
                return;
            }
        }

        if self.audio.start().is_err() {
            self.enter_error(Fault::AudioInit);
            return;
        }

        self.vad
            .calibrate(self.audio.as_mut(), self.config.audio.frame_samples);
        self.events.send(RecorderEvent::Calibrated {
            noise_floor: self.vad.noise_floor(),
        });

        // Connectivity is informational here; the recorder works offline.
        let connected = self.net.is_connected();
        self.note_connectivity(connected);

        self.last_voice_at = None;
        self.transition(State::Listening);
    }

    fn tick_listening(&mut self) {
        let now = self.clock.now();

        let frame = match self.audio.read_frame(self.config.audio.frame_samples) {
            Ok(frame) => frame,
            Err(_) => {
                self.enter_error(Fault::AudioInit);
                return;
            }
        };

        if self.vad.observe(&frame) {
            if self.battery_critical() {
                if !self.battery_refusal_reported {
                    self.battery_refusal_reported = true;
                    self.counters.recordings_refused += 1;
                    self.events.send(RecorderEvent::RecordingRefused {
                        battery_percent: self.battery_percent,
                    });
                }
                self.vad.reset();
                return;
            }
            if let Err(e) = self.begin_recording(now) {
                let fault = match e {
                    PendantError::SessionActive => Fault::Recording,
                    _ => Fault::StorageWrite,
                };
                self.enter_error(fault);
            }
            return;
        }

        if self.periodic_check_due(now) {
            self.last_periodic_check = Some(now);

            let connected = self.net.is_connected();
            self.note_connectivity(connected);
            if connected && self.queue.has_pending(self.storage.as_ref()) {
                self.transition(State::Uploading);
                return;
            }

            if let Ok(free) = self.storage.free_space()
                && free < self.config.storage.min_free_bytes
            {
                self.transition(State::Maintenance);
            }
        }
    }

    fn tick_recording(&mut self) {
        let now = self.clock.now();

        let frame = match self.audio.read_frame(self.config.audio.frame_samples) {
            Ok(frame) => frame,
            Err(_) => {
                self.enter_error(Fault::AudioInit);
                return;
            }
        };

        if self.vad.observe(&frame) {
            self.last_voice_at = Some(now);
        }

        let Some(session) = self.session.as_mut() else {
            self.enter_error(Fault::Recording);
            return;
        };
        if session.append(&frame).is_err() {
            self.enter_error(Fault::StorageWrite);
            return;
        }

        let cap = Duration::from_millis(self.config.recording.max_duration_ms);
        let silence = Duration::from_millis(self.config.recording.silence_timeout_ms);

        let target_reached = session.target_reached();
        let over_cap = now.duration_since(session.started_at()) >= cap;
        let silent_too_long = self
            .last_voice_at
            .is_some_and(|at| now.duration_since(at) >= silence);

        if target_reached || over_cap || silent_too_long {
            self.finish_session(now);
        }
    }

    fn tick_uploading(&mut self) {
        let report = match self.queue.drain(
            self.storage.as_ref(),
            self.net.as_ref(),
            self.clock.as_ref(),
            &self.events,
        ) {
            Ok(report) => report,
            Err(_) => {
                self.enter_error(Fault::Upload);
                return;
            }
        };

        self.counters.uploads_succeeded += report.uploaded as u64;
        self.counters.uploads_failed += report.failed as u64;
        if report.aborted {
            self.note_connectivity(false);
        }

        self.transition(State::Listening);
    }

    fn tick_maintenance(&mut self) {
        let uploaded_dir = PathBuf::from(defaults::UPLOADED_DIR);
        let mut removed = 0usize;
        let mut freed = 0u64;

        if let Ok(files) = self.storage.list_files(&uploaded_dir) {
            // Oldest first: names embed timestamps, so list order is age
            // order.
            for path in files.iter().take(self.config.storage.cleanup_batch) {
                let size = self.storage.file_size(path).unwrap_or(0);
                if self.storage.remove_file(path).is_ok() {
                    removed += 1;
                    freed += size;
                }
                if let Ok(free) = self.storage.free_space()
                    && free >= self.config.storage.min_free_bytes
                {
                    break;
                }
            }
        }

        self.counters.maintenance_passes += 1;
        self.events.send(RecorderEvent::MaintenanceCompleted {
            removed,
            freed_bytes: freed,
        });
        self.transition(State::Listening);
    }

    fn tick_error(&mut self) {
        let now = self.clock.now();
        let entered = match self.error_entered_at {
            Some(at) => at,
            None => {
                self.error_entered_at = Some(now);
                return;
            }
        };

        let cooldown = Duration::from_millis(self.config.error_policy.cooldown_ms);
        if now.duration_since(entered) < cooldown {
            return;
        }

        let over_ceiling = self.counters.errors > self.config.error_policy.max_errors;
        let may_recover = match self.config.error_policy.recovery {
            RecoveryPolicy::AlwaysRecover => true,
            RecoveryPolicy::GateOnErrorCount => !over_ceiling,
        };

        if may_recover {
            self.error_entered_at = None;
            self.recovery_halt_reported = false;
            self.transition(State::Init);
        } else if !self.recovery_halt_reported {
            self.recovery_halt_reported = true;
            self.events.send(RecorderEvent::RecoveryHalted {
                errors: self.counters.errors,
            });
        }
    }

    // ---- transitions and helpers ----

    fn begin_recording(&mut self, now: Instant) -> Result<()> {
        if self.session.is_some() {
            return Err(PendantError::SessionActive);
        }

        let path = self.recording_path();
        let sample_rate = self.config.audio.sample_rate;
        let target_samples = self
            .config
            .recording
            .max_duration_ms
            .saturating_mul(u64::from(sample_rate))
            / 1000;

        let session = RecordingSession::start(
            self.storage.as_ref(),
            &path,
            sample_rate,
            self.config.recording.flush_every_samples,
            target_samples,
            now,
        )?;

        self.session = Some(session);
        self.last_voice_at = Some(now);
        self.counters.recordings_started += 1;
        self.events.send(RecorderEvent::RecordingStarted {
            path: path.display().to_string(),
        });
        self.transition(State::Recording);
        Ok(())
    }

    /// Finalizes the session, then moves on to uploading when the
    /// network is reachable.
    fn finish_session(&mut self, now: Instant) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.last_voice_at = None;

        match session.finish(now) {
            Ok(finished) => {
                self.counters.recordings_finished += 1;
                self.events.send(RecorderEvent::RecordingFinished {
                    path: finished.path.display().to_string(),
                    duration_ms: finished.duration.as_millis() as u64,
                    samples: finished.samples,
                });

                let connected = self.net.is_connected();
                self.note_connectivity(connected);
                if connected {
                    self.transition(State::Uploading);
                } else {
                    self.transition(State::Listening);
                }
            }
            Err(_) => self.enter_error(Fault::StorageWrite),
        }
    }

    fn enter_error(&mut self, fault: Fault) {
        self.abandon_session();
        let _ = self.audio.stop();

        self.counters.errors += 1;
        self.last_fault = Some(fault);
        self.error_entered_at = Some(self.clock.now());
        self.events.send(RecorderEvent::FaultRaised {
            fault,
            errors: self.counters.errors,
        });
        self.transition(State::Error);
    }

    /// Best-effort close of a session that cannot continue. The data
    /// already appended stays on the medium either way.
    fn abandon_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.finish(self.clock.now());
        }
        self.last_voice_at = None;
    }

    fn transition(&mut self, to: State) {
        if to == self.state {
            return;
        }
        let from = self.state;
        self.state = to;
        self.events.send(RecorderEvent::StateChanged { from, to });
    }

    fn periodic_check_due(&self, now: Instant) -> bool {
        let interval = Duration::from_millis(self.config.upload.check_interval_ms);
        match self.last_periodic_check {
            None => true,
            Some(at) => now.duration_since(at) >= interval,
        }
    }

    fn poll_battery(&mut self) {
        let now = self.clock.now();
        let interval = Duration::from_millis(self.config.power.poll_interval_ms);
        let due = match self.last_battery_poll {
            None => true,
            Some(at) => now.duration_since(at) >= interval,
        };
        if !due {
            return;
        }
        self.last_battery_poll = Some(now);

        self.battery_percent = self.power.battery_percent();
        self.usb_powered = self.power.usb_powered();

        if self.battery_low() {
            if !self.low_battery_reported {
                self.low_battery_reported = true;
                self.events.send(RecorderEvent::BatteryLow {
                    percent: self.battery_percent,
                });
            }
        } else {
            self.low_battery_reported = false;
        }
        if !self.battery_critical() {
            self.battery_refusal_reported = false;
        }
    }

    fn battery_low(&self) -> bool {
        self.battery_percent < self.config.power.low_battery_percent && !self.usb_powered
    }

    fn battery_critical(&self) -> bool {
        self.battery_percent < self.config.power.critical_battery_percent && !self.usb_powered
    }

    fn note_connectivity(&mut self, connected: bool) {
        if self.was_connected != Some(connected) {
            self.was_connected = Some(connected);
            self.events
                .send(RecorderEvent::ConnectivityChanged { connected });
        }
    }

    /// Date-sorted path for a new recording, with a numeric suffix when
    /// the same wall-clock second already produced a file.
    fn recording_path(&self) -> PathBuf {
        let wall: DateTime<Utc> = self.clock.wall().into();
        let date = wall.format("%Y-%m-%d").to_string();
        let stamp = wall.format("%Y%m%d_%H%M%S").to_string();
        let dir = PathBuf::from(defaults::RECORDINGS_DIR).join(&date);
        let done_dir = PathBuf::from(defaults::UPLOADED_DIR).join(&date);

        let mut name = format!("REC_{stamp}.wav");
        let mut suffix = 1;
        while self.storage.exists(&dir.join(&name)) || self.storage.exists(&done_dir.join(&name)) {
            name = format!("REC_{stamp}_{suffix}.wav");
            suffix += 1;
        }
        dir.join(name)
    }

    fn led_mode(&self) -> LedMode {
        match self.state {
            State::Init | State::Maintenance => LedMode::Solid,
            State::Listening if self.battery_low() => LedMode::LowBattery,
            State::Listening => LedMode::Listening,
            State::Recording => LedMode::Recording,
            State::Uploading => LedMode::Uploading,
            State::Error => LedMode::Error(self.last_fault.unwrap_or(Fault::Recording)),
        }
    }

    fn update_led(&mut self) {
        let mode = self.led_mode();
        if self.last_led != Some(mode) {
            self.last_led = Some(mode);
            self.led.set_mode(mode);
        }
    }
}
