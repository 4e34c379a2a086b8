use crate::platform::StatusLed;

pub const LED_FAST_BLINK_MS: u32 = 200;
pub const LED_SLOW_BLINK_MS: u32 = 1_000;

/// Fast blink without WiFi, slow blink without the broker, solid when healthy.
pub fn led_should_be_on(wifi_connected: bool, broker_connected: bool, now_ms: u32) -> bool {
    if !wifi_connected {
        (now_ms / LED_FAST_BLINK_MS) % 2 == 0
    } else if !broker_connected {
        (now_ms / LED_SLOW_BLINK_MS) % 2 == 0
    } else {
        true
    }
}

/// Remembers the lit state so the pin is only driven on change.
pub struct Indicator<'a> {
    led: &'a mut dyn StatusLed,
    lit: Option<bool>,
}

impl<'a> Indicator<'a> {
    pub fn new(led: &'a mut dyn StatusLed) -> Self {
        Self { led, lit: None }
    }

    pub fn show(&mut self, on: bool) {
        if self.lit != Some(on) {
            self.led.set(on);
            self.lit = Some(on);
        }
    }

    pub fn follow_links(&mut self, wifi_connected: bool, broker_connected: bool, now_ms: u32) {
        self.show(led_should_be_on(wifi_connected, broker_connected, now_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeLed;

    #[test]
    fn blink_rate_tracks_link_health() {
        assert!(led_should_be_on(false, false, 0));
        assert!(!led_should_be_on(false, false, 200));
        assert!(led_should_be_on(true, false, 999));
        assert!(!led_should_be_on(true, false, 1_000));
        assert!(led_should_be_on(true, true, 1_000));
        assert!(led_should_be_on(true, true, 200));
    }

    #[test]
    fn only_drives_pin_on_change() {
        let mut led = FakeLed::default();
        {
            let mut indicator = Indicator::new(&mut led);
            indicator.show(true);
            indicator.show(true);
            indicator.follow_links(true, true, 5);
            indicator.show(false);
        }
        assert_eq!(led.states, vec![true, false]);
    }
}
