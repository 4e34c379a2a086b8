/// Counters that live in memory retained across deep sleep.
///
/// Only a cold boot clears them. Increments wrap at `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[repr(C)]
pub struct PersistentState {
    pub boot_count: u32,
    pub success_count: u32,
    pub last_voltage: f32,
}

impl PersistentState {
    pub const COLD: Self = Self {
        boot_count: 0,
        success_count: 0,
        last_voltage: 0.0,
    };

    pub fn record_boot(&mut self) {
        self.boot_count = self.boot_count.wrapping_add(1);
    }

    pub fn record_success(&mut self) {
        self.success_count = self.success_count.wrapping_add(1);
    }

    /// The smoothing seed; zero means no voltage has been recorded yet.
    pub fn previous_voltage(&self) -> Option<f32> {
        (self.last_voltage > 0.0 && self.last_voltage.is_finite()).then_some(self.last_voltage)
    }

    pub fn record_voltage(&mut self, volts: f32) {
        if volts.is_finite() {
            self.last_voltage = volts;
        }
    }
}
