pub const SUFFIX_TEMPERATURE: &str = "/tempset-ambient/set";
pub const SUFFIX_HUMIDITY: &str = "/tempset-humidity/set";
pub const SUFFIX_DIAGNOSTICS: &str = "/debug";
pub const SUFFIX_BATTERY: &str = "/battery/set";

pub fn topic(prefix: &str, room: &str, suffix: &str) -> String {
    format!("{prefix}{room}{suffix}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    temperature: String,
    humidity: String,
    diagnostics: String,
    battery: String,
}

impl TopicSet {
    pub fn derive(prefix: &str, room: &str) -> Self {
        Self {
            temperature: topic(prefix, room, SUFFIX_TEMPERATURE),
            humidity: topic(prefix, room, SUFFIX_HUMIDITY),
            diagnostics: topic(prefix, room, SUFFIX_DIAGNOSTICS),
            battery: topic(prefix, room, SUFFIX_BATTERY),
        }
    }

    pub fn temperature(&self) -> &str {
        &self.temperature
    }

    pub fn humidity(&self) -> &str {
        &self.humidity
    }

    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    pub fn battery(&self) -> &str {
        &self.battery
    }
}
