//! Status LED abstraction.
//!
//! On the device a single RGB LED is the only user-visible output. The
//! core never drives patterns itself; it sets a mode and the
//! implementation decides how to show it.

use crate::error::Fault;

/// What the LED should be showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    Off,
    /// Steady on, used while initializing and during maintenance.
    Solid,
    /// Slow pulse while waiting for speech.
    Listening,
    Recording,
    Uploading,
    LowBattery,
    /// Fault display, repeating the diagnostic code.
    Error(Fault),
}

pub trait StatusLed: Send {
    fn set_mode(&mut self, mode: LedMode);
}

/// LED that goes nowhere, for headless use and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLed;

impl StatusLed for NullLed {
    fn set_mode(&mut self, _mode: LedMode) {}
}

/// Records every mode change. Clones share the history, so a test can
/// hand one handle to the recorder and keep another for assertions.
#[derive(Debug, Default, Clone)]
pub struct MockLed {
    history: std::sync::Arc<std::sync::Mutex<Vec<LedMode>>>,
}

impl MockLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<LedMode> {
        self.lock().last().copied()
    }

    pub fn history(&self) -> Vec<LedMode> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LedMode>> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StatusLed for MockLed {
    fn set_mode(&mut self, mode: LedMode) {
        self.lock().push(mode);
    }
}

/// Renders the LED state as a short colored tag on stderr.
///
/// Only mode changes are printed, so a long listening stretch stays
/// quiet.
#[cfg(feature = "cli")]
pub struct TerminalLed {
    last: Option<LedMode>,
}

#[cfg(feature = "cli")]
impl TerminalLed {
    pub fn new() -> Self {
        Self { last: None }
    }
}

#[cfg(feature = "cli")]
impl Default for TerminalLed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cli")]
impl StatusLed for TerminalLed {
    fn set_mode(&mut self, mode: LedMode) {
        use owo_colors::OwoColorize;

        if self.last == Some(mode) {
            return;
        }
        self.last = Some(mode);

        match mode {
            LedMode::Off => {}
            LedMode::Solid => eprintln!("{}", "[led] busy".dimmed()),
            LedMode::Listening => eprintln!("{}", "[led] listening".cyan()),
            LedMode::Recording => eprintln!("{}", "[led] recording".red()),
            LedMode::Uploading => eprintln!("{}", "[led] uploading".blue()),
            LedMode::LowBattery => eprintln!("{}", "[led] low battery".yellow()),
            LedMode::Error(fault) => {
                eprintln!("{} {}", "[led] error:".red().bold(), fault)
            }
        }
    }
}
