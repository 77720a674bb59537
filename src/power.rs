//! Battery and charger state.
//!
//! The scheduler polls this on a fixed cadence and only ever reads two
//! facts: how full the battery is and whether external power is present.

/// Source of battery readings.
pub trait PowerMonitor: Send {
    /// Charge level in percent, 0.0 to 100.0.
    fn battery_percent(&self) -> f32;

    /// Whether the device is running on external power.
    fn usb_powered(&self) -> bool;
}

/// Fixed readings, for hosts without a battery.
#[derive(Debug, Clone, Copy)]
pub struct ConstPower {
    percent: f32,
    usb: bool,
}

impl ConstPower {
    pub fn new(percent: f32, usb: bool) -> Self {
        Self { percent, usb }
    }

    /// Full battery on external power.
    pub fn mains() -> Self {
        Self::new(100.0, true)
    }
}

impl Default for ConstPower {
    fn default() -> Self {
        Self::mains()
    }
}

impl PowerMonitor for ConstPower {
    fn battery_percent(&self) -> f32 {
        self.percent
    }

    fn usb_powered(&self) -> bool {
        self.usb
    }
}

/// Mutable readings shared with the test, so a scenario can drain the
/// battery mid-run.
#[derive(Debug, Clone, Default)]
pub struct MockPower {
    inner: std::sync::Arc<std::sync::Mutex<(f32, bool)>>,
}

impl MockPower {
    pub fn new(percent: f32, usb: bool) -> Self {
        Self {
            inner: std::sync::Arc::new(std::sync::Mutex::new((percent, usb))),
        }
    }

    pub fn set_percent(&self, percent: f32) {
        self.lock().0 = percent;
    }

    pub fn set_usb(&self, usb: bool) {
        self.lock().1 = usb;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (f32, bool)> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PowerMonitor for MockPower {
    fn battery_percent(&self) -> f32 {
        self.lock().0
    }

    fn usb_powered(&self) -> bool {
        self.lock().1
    }
}
