use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Dht11,
    Dht22,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dht11 => "DHT11",
            Self::Dht22 => "DHT22",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Battery,
    Mains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    pub hardware_id: &'static str,
    pub room_name: &'static str,
    pub display_name: &'static str,
    pub battery_powered: bool,
    pub sensor_pin: i32,
    pub sensor_kind: SensorKind,
    pub sensor_power_pin: Option<i32>,
    pub status_led_pin: Option<i32>,
    pub battery_pin: Option<i32>,
    pub cycle_interval_secs: u32,
}

impl BoardConfig {
    pub fn power_mode(&self) -> PowerMode {
        if self.battery_powered {
            PowerMode::Battery
        } else {
            PowerMode::Mains
        }
    }

    /// Battery ADC pin, treating pin 0 as "not fitted".
    pub fn battery_pin(&self) -> Option<i32> {
        self.battery_pin.filter(|pin| *pin > 0)
    }

    /// Only battery boards switch the sensor supply between cycles.
    pub fn switched_sensor_power_pin(&self) -> Option<i32> {
        if self.battery_powered {
            self.sensor_power_pin
        } else {
            None
        }
    }

    /// Battery voltage is only sampled on battery boards with an ADC pin.
    pub fn measures_battery(&self) -> bool {
        self.battery_powered && self.battery_pin().is_some()
    }
}

pub const DEFAULT_BOARD: BoardConfig = BoardConfig {
    hardware_id: "00:00:00:00:00:00",
    room_name: "default",
    display_name: "Unassigned sensor",
    battery_powered: false,
    sensor_pin: 4,
    sensor_kind: SensorKind::Dht22,
    sensor_power_pin: None,
    status_led_pin: None,
    battery_pin: None,
    cycle_interval_secs: 30,
};

pub const BOARD_CATALOG: &[BoardConfig] = &[
    BoardConfig {
        hardware_id: "30:C6:F7:44:0D:58",
        room_name: "lounge",
        display_name: "Lounge",
        battery_powered: false,
        sensor_pin: 23,
        sensor_kind: SensorKind::Dht22,
        sensor_power_pin: None,
        status_led_pin: Some(2),
        battery_pin: None,
        cycle_interval_secs: 30,
    },
    BoardConfig {
        hardware_id: "30:C6:F7:43:FE:B0",
        room_name: "bedroom",
        display_name: "Bedroom",
        battery_powered: false,
        sensor_pin: 23,
        sensor_kind: SensorKind::Dht22,
        sensor_power_pin: None,
        status_led_pin: Some(2),
        battery_pin: None,
        cycle_interval_secs: 30,
    },
    BoardConfig {
        hardware_id: "24:6F:28:9D:A8:F0",
        room_name: "office",
        display_name: "Office",
        battery_powered: false,
        sensor_pin: 16,
        sensor_kind: SensorKind::Dht11,
        sensor_power_pin: None,
        status_led_pin: None,
        battery_pin: None,
        cycle_interval_secs: 60,
    },
    BoardConfig {
        hardware_id: "24:0A:C4:25:91:08",
        room_name: "garden",
        display_name: "Garden",
        battery_powered: true,
        sensor_pin: 23,
        sensor_kind: SensorKind::Dht22,
        sensor_power_pin: Some(25),
        status_led_pin: Some(2),
        battery_pin: Some(35),
        cycle_interval_secs: 600,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub config: &'static BoardConfig,
    pub matched: bool,
}

pub fn resolve(identity: &str) -> Resolution {
    resolve_in(BOARD_CATALOG, identity)
}

pub fn resolve_in(catalog: &'static [BoardConfig], identity: &str) -> Resolution {
    match catalog.iter().find(|board| board.hardware_id == identity) {
        Some(config) => {
            info!(
                "board config found for {identity}: room `{}`",
                config.room_name
            );
            Resolution {
                config,
                matched: true,
            }
        }
        None => {
            info!("no board config for {identity}; using default");
            Resolution {
                config: &DEFAULT_BOARD,
                matched: false,
            }
        }
    }
}

pub fn format_identity(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}
