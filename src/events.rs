//! Events emitted by the recorder loop.
//!
//! The loop publishes what happened; rendering is the receiver's
//! problem. Sending never blocks: when the channel is full the event is
//! dropped, because a slow consumer must not stall the tick.

use crate::error::Fault;
use crate::scheduler::State;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

/// Everything the recorder reports while running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecorderEvent {
    StateChanged {
        from: State,
        to: State,
    },
    /// Noise floor calibration finished.
    Calibrated {
        noise_floor: f32,
    },
    RecordingStarted {
        path: String,
    },
    RecordingFinished {
        path: String,
        duration_ms: u64,
        samples: u64,
    },
    /// A detection was ignored because the battery is critically low.
    RecordingRefused {
        battery_percent: f32,
    },
    UploadSucceeded {
        path: String,
        status: u16,
    },
    UploadFailed {
        path: String,
        attempts: u32,
        detail: String,
    },
    /// Retry ceiling hit; the file stays on disk but is no longer tried.
    UploadAbandoned {
        path: String,
        attempts: u32,
    },
    /// The server accepted the file but the local mark-done failed.
    UploadInconsistent {
        path: String,
        message: String,
    },
    ConnectivityChanged {
        connected: bool,
    },
    MaintenanceCompleted {
        removed: usize,
        freed_bytes: u64,
    },
    FaultRaised {
        fault: Fault,
        errors: u32,
    },
    /// Recovery stopped after too many errors; a restart is required.
    RecoveryHalted {
        errors: u32,
    },
    BatteryLow {
        percent: f32,
    },
}

impl RecorderEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Non-blocking sending side of the event channel.
#[derive(Clone)]
pub struct EventSender {
    tx: Option<crossbeam_channel::Sender<RecorderEvent>>,
}

impl EventSender {
    /// A sender that discards everything.
    pub fn sink() -> Self {
        Self { tx: None }
    }

    /// Sends if there is room, drops otherwise.
    pub fn send(&self, event: RecorderEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, Receiver<RecorderEvent>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (EventSender { tx: Some(tx) }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_uses_snake_case_tags() {
        let event = RecorderEvent::StateChanged {
            from: State::Listening,
            to: State::Recording,
        };
        let json = event.to_json().unwrap();

        assert_eq!(
            json,
            r#"{"type":"state_changed","from":"listening","to":"recording"}"#
        );
    }

    #[test]
    fn fault_events_round_trip() {
        let event = RecorderEvent::FaultRaised {
            fault: Fault::StorageWrite,
            errors: 2,
        };
        let json = event.to_json().unwrap();
        assert!(json.contains(r#""fault":"storage_write""#));

        assert_eq!(RecorderEvent::from_json(&json).unwrap(), event);
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, rx) = channel(1);

        tx.send(RecorderEvent::ConnectivityChanged { connected: true });
        tx.send(RecorderEvent::ConnectivityChanged { connected: false });

        assert_eq!(
            rx.try_recv().unwrap(),
            RecorderEvent::ConnectivityChanged { connected: true }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sink_sender_discards_quietly() {
        let tx = EventSender::sink();
        tx.send(RecorderEvent::Calibrated { noise_floor: 25.0 });
    }

    #[test]
    fn disconnected_receiver_does_not_block_sends() {
        let (tx, rx) = channel(4);
        drop(rx);

        tx.send(RecorderEvent::ConnectivityChanged { connected: true });
    }
}
