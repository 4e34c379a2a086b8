use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Context};
use dht_sensor::{dht11, dht22};
use embedded_svc::{
    http::{client::Connection, Headers, Method, Status},
    io::{Read, Write},
    mqtt::client::QoS,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{Ets, FreeRtos},
    gpio::{AnyIOPin, AnyOutputPin, InputOutput, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::{
        client::{Configuration as HttpClientConfiguration, EspHttpConnection},
        server::{Configuration as HttpConfiguration, EspHttpServer},
    },
    log::EspLogger,
    mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    ota::EspOta,
    sntp::{EspSntp, SntpConf, SyncStatus},
    sys,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use roomnode_common::{
    clock::{Clock, WallClock},
    config::{NetworkConfig, OtaConfig},
    format_identity,
    indicator::Indicator,
    platform::{
        AnalogInput, BrokerLink, ClimateSensor, Link, NetworkLink, PowerSwitch, RawSample,
        ServiceSurface, StatusLed, SurfacePoll, Watchdog,
    },
    resolve,
    status::{lock, shared},
    update::{ChunkReader, Download, UpdateGate, UpdateSource, UpdateTarget},
    web::{accept_upload, respond, upload_response, HttpResponse, Route},
    Controller, LinkError, NodeIo, PersistentState, PowerMode, RuntimeConfig,
    SensorKind, SharedStatus, StatusSnapshot, Terminal, UpdateError, UpdateIo,
};

use crate::FIRMWARE_VERSION;

const NVS_NAMESPACE: &str = "roomnode";
const NVS_RUNTIME_KEY: &str = "runtime_json";

const RTC_MAGIC: u32 = 0x524E_4F44;
const WATCHDOG_TIMEOUT_SEC: u32 = 300;
const BROKER_CONNECT_TIMEOUT_MS: u32 = 5_000;
const SNTP_SYNC_TIMEOUT_MS: u32 = 5_000;
const POLL_STEP_MS: u32 = 100;
const MAX_VERSION_BYTES: usize = 256;

#[repr(C)]
struct RtcSlot {
    magic: u32,
    state: PersistentState,
}

#[link_section = ".rtc.data"]
static mut RTC_SLOT: RtcSlot = RtcSlot {
    magic: 0,
    state: PersistentState::COLD,
};

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let state = load_persistent_state();
    let identity = format_identity(read_station_mac()?);
    let board = resolve(&identity).config;

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_wifi_defaults(&mut runtime);
    runtime.sanitize();

    if let Ok(mut ota) = EspOta::new() {
        if let Err(err) = ota.mark_running_slot_valid() {
            warn!("failed to mark running OTA slot valid: {err:?}");
        }
    }

    let Peripherals { modem, .. } = Peripherals::take()?;
    let mut network = WifiLink::new(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;
    let mut broker = MqttLink::new(&runtime.network);
    let mut sensor = DhtSensor::new(board.sensor_pin, board.sensor_kind)
        .context("failed to initialize sensor")?;
    let mut sensor_power = board.switched_sensor_power_pin().and_then(GpioOutput::new);
    let mut battery = if board.measures_battery() {
        board.battery_pin().and_then(|pin| match BatteryAdc::new(pin) {
            Ok(adc) => Some(adc),
            Err(err) => {
                warn!("battery ADC unavailable on GPIO{pin}: {err:#}");
                None
            }
        })
    } else {
        None
    };
    let mut led = board.status_led_pin.and_then(GpioOutput::new);
    let mut clock = EspClock;
    let mut wall_clock = SntpClock::new(&runtime.clock.ntp_server);

    let status = shared(StatusSnapshot::new(
        &identity,
        board.room_name,
        board.display_name,
        FIRMWARE_VERSION,
        board.battery_powered,
    ));
    let mains = board.power_mode() == PowerMode::Mains;
    let update_gate = UpdateGate::new();
    let mut surface = EspSurface::new(status.clone(), update_gate.clone());
    let mut update_source = HttpUpdateSource::new(runtime.ota.clone());
    let mut update_target = OtaStaging::new();
    let mut watchdog = if mains {
        match TaskWatchdog::subscribe(WATCHDOG_TIMEOUT_SEC) {
            Ok(watchdog) => Some(watchdog),
            Err(err) => {
                warn!("task watchdog unavailable: {err:#}");
                None
            }
        }
    } else {
        None
    };

    let mut controller = Controller::new(board, runtime, FIRMWARE_VERSION, state, status);
    let terminal = {
        let mut io = NodeIo {
            network: &mut network,
            broker: &mut broker,
            sensor: &mut sensor,
            sensor_power: sensor_power.as_mut().map(|pin| pin as &mut dyn PowerSwitch),
            battery: battery.as_mut().map(|adc| adc as &mut dyn AnalogInput),
            clock: &mut clock,
            wall_clock: &mut wall_clock,
            surface: mains.then_some(&mut surface as &mut dyn ServiceSurface),
            updates: Some(UpdateIo {
                source: &mut update_source,
                target: &mut update_target,
                gate: &update_gate,
            }),
            led: led.as_mut().map(|led| Indicator::new(led)),
            watchdog: watchdog.as_mut().map(|wd| wd as &mut dyn Watchdog),
        };
        controller.run(&mut io)
    };

    store_persistent_state(controller.persistent_state());

    match terminal {
        Terminal::Suspend { seconds } => {
            info!("entering deep sleep for {seconds}s");
            drop(broker);
            unsafe {
                sys::esp_sleep_enable_timer_wakeup(u64::from(seconds) * 1_000_000);
                sys::esp_deep_sleep_start();
            }
        }
        Terminal::Restart => {
            info!("restarting");
            FreeRtos::delay_ms(POLL_STEP_MS);
            unsafe { sys::esp_restart() };
        }
    }

    Ok(())
}

fn load_persistent_state() -> PersistentState {
    let reason = unsafe { sys::esp_reset_reason() };
    // SAFETY: read once on the main task before anything else runs.
    let slot = unsafe { core::ptr::addr_of!(RTC_SLOT).read() };

    if reason == sys::esp_reset_reason_t_ESP_RST_POWERON || slot.magic != RTC_MAGIC {
        info!("cold boot, persistent counters reset");
        PersistentState::COLD
    } else {
        slot.state
    }
}

fn store_persistent_state(state: PersistentState) {
    // SAFETY: written once on the main task right before sleep or restart.
    unsafe {
        core::ptr::addr_of_mut!(RTC_SLOT).write(RtcSlot {
            magic: RTC_MAGIC,
            state,
        });
    }
}

fn read_station_mac() -> anyhow::Result<[u8; 6]> {
    let mut mac = [0_u8; 6];
    let rc = unsafe { sys::esp_read_mac(mac.as_mut_ptr(), sys::esp_mac_type_t_ESP_MAC_WIFI_STA) };
    if rc == sys::ESP_OK {
        return Ok(mac);
    }
    Err(anyhow!("esp_read_mac failed with code {}", rc))
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        runtime.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }

    if runtime.network.wifi_pass.is_empty() {
        runtime.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or("CHANGE_ME").to_string();
    }
}

struct WifiLink {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl WifiLink {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        network: &NetworkConfig,
    ) -> anyhow::Result<Self> {
        let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
        let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

        let auth_method = if network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: network
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi ssid too long"))?,
            password: network
                .wifi_pass
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        wifi.start()?;
        info!("wifi started for `{}`", network.wifi_ssid);
        Ok(Self { wifi })
    }
}

impl Link for WifiLink {
    fn name(&self) -> &'static str {
        "wifi"
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        self.wifi
            .connect()
            .map_err(|err| LinkError::Refused(format!("{err:#}")))?;
        self.wifi.wait_netif_up().map_err(|_| LinkError::Timeout)
    }

    fn disconnect(&mut self) {
        let _ = self.wifi.disconnect();
    }

    fn address(&self) -> Option<String> {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip.to_string())
    }
}

impl NetworkLink for WifiLink {}

/// One MQTT session per `connect`; dropping the client ends its poll thread.
struct MqttLink {
    url: String,
    client_id: String,
    user: String,
    pass: String,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
}

impl MqttLink {
    fn new(network: &NetworkConfig) -> Self {
        Self {
            url: format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port),
            client_id: network.mqtt_client_id.clone(),
            user: network.mqtt_user.clone(),
            pass: network.mqtt_pass.clone(),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Link for MqttLink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn is_connected(&mut self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        self.client = None;

        let conf = MqttClientConfiguration {
            client_id: Some(self.client_id.as_str()),
            username: (!self.user.is_empty()).then_some(self.user.as_str()),
            password: (!self.pass.is_empty()).then_some(self.pass.as_str()),
            ..Default::default()
        };
        let (client, mut conn) = EspMqttClient::new(&self.url, &conf)
            .map_err(|err| LinkError::Refused(format!("{err:?}")))?;

        let connected = Arc::new(AtomicBool::new(false));
        self.connected = connected.clone();
        thread::Builder::new()
            .name("mqtt-poll".to_string())
            .stack_size(6144)
            .spawn(move || {
                while let Ok(event) = conn.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => connected.store(true, Ordering::SeqCst),
                        EventPayload::Disconnected => connected.store(false, Ordering::SeqCst),
                        EventPayload::Error(err) => warn!("mqtt event error: {err:?}"),
                        _ => {}
                    }
                }
                connected.store(false, Ordering::SeqCst);
            })
            .map_err(|err| LinkError::Other(format!("failed to spawn mqtt thread: {err}")))?;
        self.client = Some(client);

        for _ in 0..BROKER_CONNECT_TIMEOUT_MS / POLL_STEP_MS {
            if self.connected.load(Ordering::SeqCst) {
                return Ok(());
            }
            FreeRtos::delay_ms(POLL_STEP_MS);
        }

        self.client = None;
        Err(LinkError::Timeout)
    }

    fn disconnect(&mut self) {
        self.client = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl BrokerLink for MqttLink {
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), LinkError> {
        let client = self.client.as_mut().ok_or(LinkError::NotConnected)?;
        client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .map(|_| ())
            .map_err(|err| LinkError::Other(format!("{err:?}")))
    }
}

struct DhtSensor {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    pin_number: i32,
    kind: SensorKind,
    delay: Ets,
}

impl DhtSensor {
    fn new(pin_number: i32, kind: SensorKind) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(unsafe { AnyIOPin::new(pin_number) })?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        Ok(Self {
            pin,
            pin_number,
            kind,
            delay: Ets,
        })
    }
}

impl ClimateSensor for DhtSensor {
    fn sample(&mut self) -> RawSample {
        let result = match self.kind {
            SensorKind::Dht11 => dht11::blocking::read(&mut self.delay, &mut self.pin)
                .map(|reading| {
                    (
                        f32::from(reading.temperature),
                        f32::from(reading.relative_humidity),
                    )
                }),
            SensorKind::Dht22 => dht22::blocking::read(&mut self.delay, &mut self.pin)
                .map(|reading| (reading.temperature, reading.relative_humidity)),
        };

        match result {
            Ok((temperature_c, humidity_pct)) => RawSample {
                temperature_c,
                humidity_pct,
            },
            Err(err) => {
                warn!(
                    "{} read failed on GPIO{}: {err:?}",
                    self.kind.as_str(),
                    self.pin_number
                );
                RawSample::FAILED
            }
        }
    }
}

/// A plain push-pull output: sensor supply rail or status LED.
struct GpioOutput {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    pin_number: i32,
}

impl GpioOutput {
    fn new(pin_number: i32) -> Option<Self> {
        match PinDriver::output(unsafe { AnyOutputPin::new(pin_number) }) {
            Ok(mut pin) => {
                let _ = pin.set_low();
                Some(Self { pin, pin_number })
            }
            Err(err) => {
                warn!("failed to initialize output on GPIO{pin_number}: {err:?}");
                None
            }
        }
    }

    fn drive(&mut self, high: bool) {
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(err) = result {
            warn!("failed to drive GPIO{}: {err:?}", self.pin_number);
        }
    }
}

impl PowerSwitch for GpioOutput {
    fn energize(&mut self) {
        self.drive(true);
    }

    fn release(&mut self) {
        self.drive(false);
    }
}

impl StatusLed for GpioOutput {
    fn set(&mut self, on: bool) {
        self.drive(on);
    }
}

struct BatteryAdc {
    handle: sys::adc_oneshot_unit_handle_t,
    channel: sys::adc_channel_t,
}

impl BatteryAdc {
    fn new(gpio: i32) -> anyhow::Result<Self> {
        let mut unit: sys::adc_unit_t = 0;
        let mut channel: sys::adc_channel_t = 0;
        let rc = unsafe { sys::adc_oneshot_io_to_channel(gpio, &mut unit, &mut channel) };
        if rc != sys::ESP_OK {
            return Err(anyhow!("GPIO{gpio} is not an ADC pin (code {rc})"));
        }

        let unit_cfg = sys::adc_oneshot_unit_init_cfg_t {
            unit_id: unit,
            ..Default::default()
        };
        let mut handle: sys::adc_oneshot_unit_handle_t = core::ptr::null_mut();
        let rc = unsafe { sys::adc_oneshot_new_unit(&unit_cfg, &mut handle) };
        if rc != sys::ESP_OK {
            return Err(anyhow!("adc_oneshot_new_unit failed with code {}", rc));
        }

        let channel_cfg = sys::adc_oneshot_chan_cfg_t {
            atten: sys::adc_atten_t_ADC_ATTEN_DB_11,
            bitwidth: sys::adc_bitwidth_t_ADC_BITWIDTH_DEFAULT,
        };
        let rc = unsafe { sys::adc_oneshot_config_channel(handle, channel, &channel_cfg) };
        if rc != sys::ESP_OK {
            unsafe { sys::adc_oneshot_del_unit(handle) };
            return Err(anyhow!("adc_oneshot_config_channel failed with code {}", rc));
        }

        Ok(Self { handle, channel })
    }
}

impl AnalogInput for BatteryAdc {
    fn read_raw(&mut self) -> Option<u16> {
        let mut value = 0_i32;
        let rc = unsafe { sys::adc_oneshot_read(self.handle, self.channel, &mut value) };
        if rc != sys::ESP_OK {
            warn!("adc_oneshot_read failed with code {rc}");
            return None;
        }
        u16::try_from(value).ok()
    }
}

impl Drop for BatteryAdc {
    fn drop(&mut self) {
        unsafe { sys::adc_oneshot_del_unit(self.handle) };
    }
}

struct EspClock;

impl EspClock {
    fn micros() -> u64 {
        u64::try_from(unsafe { sys::esp_timer_get_time() }).unwrap_or(0)
    }
}

impl Clock for EspClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wrap.
        (Self::micros() / 1_000) as u32
    }

    fn uptime(&self) -> Duration {
        Duration::from_micros(Self::micros())
    }

    fn delay_ms(&mut self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }
}

/// Started on first use, since SNTP needs the network up.
struct SntpClock {
    server: String,
    sntp: Option<EspSntp<'static>>,
}

impl SntpClock {
    fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            sntp: None,
        }
    }
}

impl WallClock for SntpClock {
    fn now_epoch_secs(&mut self) -> Option<i64> {
        if self.sntp.is_none() {
            let mut conf = SntpConf::default();
            conf.servers[0] = self.server.as_str();
            match EspSntp::new(&conf) {
                Ok(sntp) => self.sntp = Some(sntp),
                Err(err) => {
                    warn!("failed to start SNTP: {err:?}");
                    return None;
                }
            }
        }

        let sntp = self.sntp.as_ref()?;
        for _ in 0..SNTP_SYNC_TIMEOUT_MS / POLL_STEP_MS {
            if sntp.get_sync_status() == SyncStatus::Completed {
                break;
            }
            FreeRtos::delay_ms(POLL_STEP_MS);
        }
        if sntp.get_sync_status() != SyncStatus::Completed {
            return None;
        }

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|since| i64::try_from(since.as_secs()).ok())
    }
}

struct TaskWatchdog;

impl TaskWatchdog {
    fn subscribe(timeout_sec: u32) -> anyhow::Result<Self> {
        init_watchdog(timeout_sec)?;
        add_current_task_to_watchdog()?;
        Ok(Self)
    }
}

impl Watchdog for TaskWatchdog {
    fn feed(&mut self) {
        let _ = unsafe { sys::esp_task_wdt_reset() };
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { sys::esp_task_wdt_init(&config) };
    if rc == sys::ESP_OK || rc == sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == sys::ESP_OK || rc == sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

/// Writes into the next OTA partition; the boot partition only moves on
/// a successful `finalize`.
struct OtaStaging {
    partition: *const sys::esp_partition_t,
    handle: Option<sys::esp_ota_handle_t>,
}

impl OtaStaging {
    fn new() -> Self {
        Self {
            partition: core::ptr::null(),
            handle: None,
        }
    }
}

impl UpdateTarget for OtaStaging {
    fn begin(&mut self, expected_size: Option<usize>) -> Result<(), UpdateError> {
        self.abort();

        let partition = unsafe { sys::esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return Err(UpdateError::Begin("no OTA partition available".to_string()));
        }

        let size = expected_size.unwrap_or(sys::OTA_SIZE_UNKNOWN as usize);
        let mut handle: sys::esp_ota_handle_t = 0;
        let rc = unsafe { sys::esp_ota_begin(partition, size, &mut handle) };
        if rc != sys::ESP_OK {
            return Err(UpdateError::Begin(format!("esp_ota_begin failed with code {rc}")));
        }

        self.partition = partition;
        self.handle = Some(handle);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize, UpdateError> {
        let handle = self
            .handle
            .ok_or_else(|| UpdateError::Write("no update in progress".to_string()))?;
        let rc = unsafe { sys::esp_ota_write(handle, chunk.as_ptr().cast(), chunk.len()) };
        if rc != sys::ESP_OK {
            return Err(UpdateError::Write(format!("esp_ota_write failed with code {rc}")));
        }
        Ok(chunk.len())
    }

    fn finalize(&mut self) -> Result<(), UpdateError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| UpdateError::Finalize("no update in progress".to_string()))?;

        let rc = unsafe { sys::esp_ota_end(handle) };
        if rc != sys::ESP_OK {
            return Err(UpdateError::Finalize(format!("esp_ota_end failed with code {rc}")));
        }
        let rc = unsafe { sys::esp_ota_set_boot_partition(self.partition) };
        if rc != sys::ESP_OK {
            return Err(UpdateError::Finalize(format!(
                "esp_ota_set_boot_partition failed with code {rc}"
            )));
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = unsafe { sys::esp_ota_abort(handle) };
        }
    }
}

impl Drop for OtaStaging {
    fn drop(&mut self) {
        self.abort();
    }
}

struct HttpUpdateSource {
    ota: OtaConfig,
    connection: Option<EspHttpConnection>,
}

impl HttpUpdateSource {
    fn new(ota: OtaConfig) -> Self {
        Self {
            ota,
            connection: None,
        }
    }

    fn get(&mut self, path: &str) -> Result<&mut EspHttpConnection, UpdateError> {
        let url = self.ota.url(path);
        let conf = HttpClientConfiguration {
            timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        self.connection = None;
        let connection = EspHttpConnection::new(&conf).map_err(fetch_error)?;
        let connection = self.connection.insert(connection);
        connection
            .initiate_request(Method::Get, &url, &[])
            .map_err(fetch_error)?;
        connection.initiate_response().map_err(fetch_error)?;

        let status = connection.status();
        if !(200..300).contains(&status) {
            return Err(UpdateError::Status(status));
        }
        Ok(connection)
    }
}

fn fetch_error<E: core::fmt::Debug>(err: E) -> UpdateError {
    UpdateError::Fetch(format!("{err:?}"))
}

/// Adapts any embedded-io reader (HTTP response or request body).
struct BodyReader<'r, R>(&'r mut R);

impl<R: Read> ChunkReader for BodyReader<'_, R> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, UpdateError> {
        self.0.read(buf).map_err(fetch_error)
    }
}

impl UpdateSource for HttpUpdateSource {
    fn fetch_text(&mut self, path: &str) -> Result<String, UpdateError> {
        let connection = self.get(path)?;
        let mut body = Vec::new();
        let mut chunk = [0_u8; 128];

        while body.len() < MAX_VERSION_BYTES {
            let read = connection.read(&mut chunk).map_err(fetch_error)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn open(&mut self, path: &str) -> Result<Download<'_>, UpdateError> {
        let connection = self.get(path)?;
        let content_length = connection
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<usize>().ok());

        Ok(Download {
            content_length,
            body: Box::new(BodyReader(connection)),
        })
    }
}

struct EspSurface {
    server: Option<EspHttpServer<'static>>,
    status: SharedStatus,
    gate: UpdateGate,
    restart: Arc<AtomicBool>,
}

impl EspSurface {
    fn new(status: SharedStatus, gate: UpdateGate) -> Self {
        Self {
            server: None,
            status,
            gate,
            restart: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ServiceSurface for EspSurface {
    fn start(&mut self) -> Result<(), String> {
        if self.server.is_none() {
            let server = create_http_server(self.status.clone(), self.gate.clone(), self.restart.clone())
                .map_err(|err| format!("{err:#}"))?;
            self.server = Some(server);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.server.is_some()
    }

    fn poll(&mut self) -> SurfacePoll {
        if self.restart.load(Ordering::SeqCst) {
            SurfacePoll::RestartRequested
        } else {
            SurfacePoll::Idle
        }
    }
}

fn create_http_server(
    status: SharedStatus,
    gate: UpdateGate,
    restart: Arc<AtomicBool>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 12 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    for (path, route) in [
        ("/", Route::StatusPage),
        ("/data", Route::Data),
        ("/update", Route::UpdateForm),
    ] {
        let status = status.clone();
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            let snapshot = lock(&status).clone();
            write_response(req, respond(route, &snapshot, EspClock.uptime()))
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/update", Method::Post, move |mut req| {
        let content_type = req.header("Content-Type").map(str::to_string);
        let mut target = OtaStaging::new();
        let result = accept_upload(
            &gate,
            content_type.as_deref(),
            &mut BodyReader(&mut req),
            &mut target,
        );

        match &result {
            Ok(report) => info!(
                "uploaded firmware staged ({} bytes, sha256 {})",
                report.bytes, report.sha256
            ),
            Err(err) => warn!("firmware upload failed: {err}"),
        }

        write_response(req, upload_response(&result))?;
        if result.is_ok() {
            restart.store(true, Ordering::SeqCst);
        }
        Ok(())
    })?;

    info!("status server listening");
    Ok(server)
}

fn write_response(
    req: esp_idf_svc::http::server::Request<&mut esp_idf_svc::http::server::EspHttpConnection<'_>>,
    response: HttpResponse,
) -> anyhow::Result<()> {
    req.into_response(
        response.status,
        None,
        &[("Content-Type", response.content_type)],
    )?
    .write_all(&response.body)?;
    Ok(())
}

