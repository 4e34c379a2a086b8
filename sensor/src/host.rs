//! Desktop simulation of the node: a real broker and HTTP surface, with the
//! sensor, battery and firmware staging simulated on the local machine.

use std::{
    fs::{self, File},
    io::Write,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::StreamExt;
use rumqttc::{Client, Event, Incoming, MqttOptions, QoS};
use tokio::{net::TcpListener, runtime::Runtime, sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use roomnode_common::{
    board::DEFAULT_BOARD,
    clock::{Clock, WallClock},
    config::{NetworkConfig, OtaConfig},
    platform::{
        AnalogInput, BrokerLink, ClimateSensor, Link, NetworkLink, PowerSwitch, RawSample,
        ServiceSurface, SurfacePoll,
    },
    resolve,
    status::{lock, shared},
    update::{ChunkReader, Download, IoReader, UpdateGate, UpdateSource, UpdateTarget},
    web::{accept_upload, respond, upload_response, HttpResponse, Route},
    BoardConfig, Controller, LinkError, NodeIo, PersistentState, PowerMode, RuntimeConfig,
    SharedStatus, StatusSnapshot, Terminal, UpdateError, UpdateIo,
};

use crate::FIRMWARE_VERSION;

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const UPLOAD_QUEUE_DEPTH: usize = 8;
const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const STAGED_IMAGE: &str = "firmware.bin";
const STAGED_PARTIAL: &str = "firmware.bin.part";

struct HostSettings {
    identity: String,
    runtime: RuntimeConfig,
    http_port: u16,
    staging_dir: PathBuf,
}

impl HostSettings {
    fn from_env() -> Self {
        let mut runtime = RuntimeConfig::default();
        runtime.network.mqtt_host = env_or("MQTT_HOST", "127.0.0.1");
        runtime.network.mqtt_port = env_parse("MQTT_PORT").unwrap_or(1883);
        runtime.network.mqtt_user = std::env::var("MQTT_USER").unwrap_or_default();
        runtime.network.mqtt_pass = std::env::var("MQTT_PASS").unwrap_or_default();
        runtime.network.mqtt_client_id = "roomnode-sim".to_string();
        runtime.ota.host = env_or("OTA_HOST", "127.0.0.1");
        runtime.ota.port = env_parse("OTA_PORT").unwrap_or(8000);
        runtime.sanitize();

        Self {
            identity: env_or("NODE_IDENTITY", DEFAULT_BOARD.hardware_id),
            runtime,
            http_port: env_parse("HTTP_PORT").unwrap_or(8080),
            staging_dir: PathBuf::from(env_or("STAGING_DIR", "target/ota-staging")),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = HostSettings::from_env();
    let board = resolve(&settings.identity).config;
    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    let booted = Instant::now();

    let status = shared(fresh_snapshot(&settings.identity, board));
    let update_gate = UpdateGate::new();
    let mut surface = HostSurface::new(
        runtime.handle().clone(),
        settings.http_port,
        SurfaceState {
            status: status.clone(),
            staging_dir: settings.staging_dir.clone(),
            gate: update_gate.clone(),
            restart: Arc::new(AtomicBool::new(false)),
            booted,
        },
    );
    let mut network = LoopbackLink::default();
    let mut broker = RumqttLink::new(&settings.runtime.network);
    let mut sensor = SimulatedSensor::default();
    let mut power = LoggedPowerSwitch;
    let mut battery = SimulatedBattery::default();
    let mut clock = HostClock::new();
    let mut wall_clock = SystemWallClock;
    let mut update_source = HttpUpdateSource::new(settings.runtime.ota.clone())?;
    let mut update_target = FileStagingTarget::new(settings.staging_dir.clone());

    info!(
        "simulating `{}` ({:?}) as {}",
        board.room_name,
        board.power_mode(),
        settings.identity
    );

    let mut state = PersistentState::COLD;
    loop {
        let mut controller = Controller::new(
            board,
            settings.runtime.clone(),
            FIRMWARE_VERSION,
            state,
            status.clone(),
        );

        let terminal = {
            let mut io = NodeIo {
                network: &mut network,
                broker: &mut broker,
                sensor: &mut sensor,
                sensor_power: board
                    .switched_sensor_power_pin()
                    .is_some()
                    .then_some(&mut power as &mut dyn PowerSwitch),
                battery: board
                    .measures_battery()
                    .then_some(&mut battery as &mut dyn AnalogInput),
                clock: &mut clock,
                wall_clock: &mut wall_clock,
                surface: (board.power_mode() == PowerMode::Mains)
                    .then_some(&mut surface as &mut dyn ServiceSurface),
                updates: Some(UpdateIo {
                    source: &mut update_source,
                    target: &mut update_target,
                    gate: &update_gate,
                }),
                led: None,
                watchdog: None,
            };
            controller.run(&mut io)
        };
        state = controller.persistent_state();

        match terminal {
            Terminal::Suspend { seconds } => {
                info!("simulated deep sleep for {seconds}s");
                thread::sleep(Duration::from_secs(u64::from(seconds)));
            }
            Terminal::Restart => {
                info!("simulated restart (boot {})", state.boot_count);
                *lock(&status) = fresh_snapshot(&settings.identity, board);
                update_gate.rebooted();
            }
        }
    }
}

fn fresh_snapshot(identity: &str, board: &BoardConfig) -> StatusSnapshot {
    StatusSnapshot::new(
        identity,
        board.room_name,
        board.display_name,
        FIRMWARE_VERSION,
        board.battery_powered,
    )
}

/// The host is always on the network.
#[derive(Default)]
struct LoopbackLink {
    up: bool,
}

impl Link for LoopbackLink {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn is_connected(&mut self) -> bool {
        self.up
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        self.up = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.up = false;
    }

    fn address(&self) -> Option<String> {
        self.up.then(|| "127.0.0.1".to_string())
    }
}

impl NetworkLink for LoopbackLink {}

struct RumqttLink {
    network: NetworkConfig,
    client: Option<Client>,
    connected: Arc<AtomicBool>,
}

impl RumqttLink {
    fn new(network: &NetworkConfig) -> Self {
        Self {
            network: network.clone(),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Link for RumqttLink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn is_connected(&mut self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        self.disconnect();

        let mut options = MqttOptions::new(
            self.network.mqtt_client_id.clone(),
            self.network.mqtt_host.clone(),
            self.network.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        if !self.network.mqtt_user.is_empty() {
            options.set_credentials(
                self.network.mqtt_user.clone(),
                self.network.mqtt_pass.clone(),
            );
        }

        let (client, mut connection) = Client::new(options, 32);
        let connected = Arc::new(AtomicBool::new(false));
        self.connected = connected.clone();

        thread::Builder::new()
            .name("mqtt-poll".to_string())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            connected.store(true, Ordering::SeqCst);
                        }
                        Ok(Event::Incoming(Incoming::Disconnect)) => {
                            connected.store(false, Ordering::SeqCst);
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!("mqtt connection error: {err}");
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
            })
            .map_err(|err| LinkError::Other(format!("failed to spawn mqtt thread: {err}")))?;
        self.client = Some(client);

        let deadline = Instant::now() + BROKER_CONNECT_TIMEOUT;
        while Instant::now() < deadline {
            if self.connected.load(Ordering::SeqCst) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }

        self.disconnect();
        Err(LinkError::Timeout)
    }

    fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.disconnect();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl BrokerLink for RumqttLink {
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), LinkError> {
        let client = self.client.as_mut().ok_or(LinkError::NotConnected)?;
        client
            .publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|err| LinkError::Other(err.to_string()))
    }
}

/// Drifts slowly around room conditions.
#[derive(Default)]
struct SimulatedSensor {
    tick: u32,
}

impl ClimateSensor for SimulatedSensor {
    fn sample(&mut self) -> RawSample {
        self.tick = self.tick.wrapping_add(1);
        RawSample {
            temperature_c: 21.0 + (self.tick % 8) as f32 * 0.2,
            humidity_pct: 45.0 + (self.tick % 6) as f32 * 0.5,
        }
    }
}

/// A slowly discharging cell, around 4 V through the divider.
#[derive(Default)]
struct SimulatedBattery {
    samples: u32,
}

impl AnalogInput for SimulatedBattery {
    fn read_raw(&mut self) -> Option<u16> {
        self.samples = self.samples.wrapping_add(1);
        let droop = u16::try_from((self.samples / 100) % 200).unwrap_or(0);
        Some(2_480 - droop)
    }
}

struct LoggedPowerSwitch;

impl PowerSwitch for LoggedPowerSwitch {
    fn energize(&mut self) {
        info!("sensor power on");
    }

    fn release(&mut self) {
        info!("sensor power off");
    }
}

struct HostClock {
    origin: Instant,
}

impl HostClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for HostClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wrap.
        self.origin.elapsed().as_millis() as u32
    }

    fn uptime(&self) -> Duration {
        self.origin.elapsed()
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_epoch_secs(&mut self) -> Option<i64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|since| i64::try_from(since.as_secs()).ok())
    }
}

struct HttpUpdateSource {
    ota: OtaConfig,
    client: reqwest::blocking::Client,
}

impl HttpUpdateSource {
    fn new(ota: OtaConfig) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build update http client")?;
        Ok(Self { ota, client })
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response, UpdateError> {
        let response = self
            .client
            .get(self.ota.url(path))
            .send()
            .map_err(|err| UpdateError::Fetch(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

impl UpdateSource for HttpUpdateSource {
    fn fetch_text(&mut self, path: &str) -> Result<String, UpdateError> {
        self.get(path)?
            .text()
            .map_err(|err| UpdateError::Fetch(err.to_string()))
    }

    fn open(&mut self, path: &str) -> Result<Download<'_>, UpdateError> {
        let response = self.get(path)?;
        let content_length = response
            .content_length()
            .and_then(|length| usize::try_from(length).ok());

        Ok(Download {
            content_length,
            body: Box::new(IoReader(response)),
        })
    }
}

/// Stages images as `firmware.bin.part`, renamed to `firmware.bin` only on
/// a successful finalize.
struct FileStagingTarget {
    dir: PathBuf,
    file: Option<File>,
}

impl FileStagingTarget {
    fn new(dir: PathBuf) -> Self {
        Self { dir, file: None }
    }

    fn partial_path(&self) -> PathBuf {
        self.dir.join(STAGED_PARTIAL)
    }
}

impl UpdateTarget for FileStagingTarget {
    fn begin(&mut self, _expected_size: Option<usize>) -> Result<(), UpdateError> {
        self.abort();
        fs::create_dir_all(&self.dir).map_err(|err| UpdateError::Begin(err.to_string()))?;
        let file =
            File::create(self.partial_path()).map_err(|err| UpdateError::Begin(err.to_string()))?;
        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize, UpdateError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| UpdateError::Write("no update in progress".to_string()))?;
        file.write(chunk)
            .map_err(|err| UpdateError::Write(err.to_string()))
    }

    fn finalize(&mut self) -> Result<(), UpdateError> {
        let file = self
            .file
            .take()
            .ok_or_else(|| UpdateError::Finalize("no update in progress".to_string()))?;
        file.sync_all()
            .map_err(|err| UpdateError::Finalize(err.to_string()))?;
        drop(file);

        let staged = self.dir.join(STAGED_IMAGE);
        fs::rename(self.partial_path(), &staged)
            .map_err(|err| UpdateError::Finalize(err.to_string()))?;
        info!("firmware staged at {}", staged.display());
        Ok(())
    }

    fn abort(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(self.partial_path());
        }
    }
}

#[derive(Clone)]
struct SurfaceState {
    status: SharedStatus,
    staging_dir: PathBuf,
    gate: UpdateGate,
    restart: Arc<AtomicBool>,
    booted: Instant,
}

struct HostSurface {
    runtime: tokio::runtime::Handle,
    port: u16,
    state: SurfaceState,
    server: Option<JoinHandle<()>>,
}

impl HostSurface {
    fn new(runtime: tokio::runtime::Handle, port: u16, state: SurfaceState) -> Self {
        Self {
            runtime,
            port,
            state,
            server: None,
        }
    }
}

impl ServiceSurface for HostSurface {
    fn start(&mut self) -> Result<(), String> {
        if self.server.is_some() {
            return Ok(());
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = self
            .runtime
            .block_on(TcpListener::bind(addr))
            .map_err(|err| format!("failed to bind status server at {addr}: {err}"))?;

        let app = Router::new()
            .route("/", get(handle_status_page))
            .route("/data", get(handle_data))
            .route("/update", get(handle_update_form).post(handle_upload))
            .fallback(handle_not_found)
            .with_state(self.state.clone());

        self.server = Some(self.runtime.spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                warn!("status server stopped: {err}");
            }
        }));
        info!("status server listening on http://{addr}");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.server
            .as_ref()
            .is_some_and(|server| !server.is_finished())
    }

    fn poll(&mut self) -> SurfacePoll {
        if self.state.restart.swap(false, Ordering::SeqCst) {
            SurfacePoll::RestartRequested
        } else {
            SurfacePoll::Idle
        }
    }
}

fn render(state: &SurfaceState, route: Route) -> Response {
    let snapshot = lock(&state.status).clone();
    into_axum(respond(route, &snapshot, state.booted.elapsed()))
}

fn into_axum(response: HttpResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(CONTENT_TYPE, response.content_type)], response.body).into_response()
}

async fn handle_status_page(State(state): State<SurfaceState>) -> Response {
    render(&state, Route::StatusPage)
}

async fn handle_data(State(state): State<SurfaceState>) -> Response {
    render(&state, Route::Data)
}

async fn handle_update_form(State(state): State<SurfaceState>) -> Response {
    render(&state, Route::UpdateForm)
}

async fn handle_not_found(State(state): State<SurfaceState>) -> Response {
    render(&state, Route::NotFound)
}

/// Request body chunks handed from the async handler to the blocking writer.
type BodyChunk = Result<Bytes, String>;

/// Blocking side of a streamed request body.
struct ChannelBody {
    chunks: mpsc::Receiver<BodyChunk>,
    pending: Bytes,
}

impl ChannelBody {
    fn new(chunks: mpsc::Receiver<BodyChunk>) -> Self {
        Self {
            chunks,
            pending: Bytes::new(),
        }
    }
}

impl ChunkReader for ChannelBody {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, UpdateError> {
        while self.pending.is_empty() {
            match self.chunks.blocking_recv() {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(err)) => return Err(UpdateError::Fetch(err)),
                None => return Ok(0),
            }
        }
        let len = buf.len().min(self.pending.len());
        buf[..len].copy_from_slice(&self.pending[..len]);
        self.pending = self.pending.slice(len..);
        Ok(len)
    }
}

async fn handle_upload(
    State(state): State<SurfaceState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let staging_dir = state.staging_dir.clone();
    let gate = state.gate.clone();
    let (tx, rx) = mpsc::channel(UPLOAD_QUEUE_DEPTH);

    let writer = tokio::task::spawn_blocking(move || {
        let mut target = FileStagingTarget::new(staging_dir);
        accept_upload(
            &gate,
            content_type.as_deref(),
            &mut ChannelBody::new(rx),
            &mut target,
        )
    });

    let mut stream = body.into_data_stream();
    let mut received = 0_usize;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => {
                received += chunk.len();
                if received > MAX_UPLOAD_BYTES {
                    Err(format!("upload exceeds {MAX_UPLOAD_BYTES} bytes"))
                } else {
                    Ok(chunk)
                }
            }
            Err(err) => Err(err.to_string()),
        };
        let failed = chunk.is_err();
        // A closed channel means the writer already finished or gave up.
        if tx.send(chunk).await.is_err() || failed {
            break;
        }
    }
    drop(tx);

    let result = writer
        .await
        .unwrap_or_else(|err| Err(UpdateError::Write(format!("upload task failed: {err}"))));

    match &result {
        Ok(report) => {
            info!(
                "uploaded firmware staged ({} bytes, sha256 {})",
                report.bytes, report.sha256
            );
            state.restart.store(true, Ordering::SeqCst);
        }
        Err(err) => warn!("firmware upload failed: {err}"),
    }

    into_axum(upload_response(&result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "roomnode-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn finalize_renames_partial_image() {
        let dir = scratch_dir("finalize");
        let mut target = FileStagingTarget::new(dir.clone());

        target.begin(None).unwrap();
        assert_eq!(target.write(b"image-bytes").unwrap(), 11);
        target.finalize().unwrap();

        assert_eq!(fs::read(dir.join(STAGED_IMAGE)).unwrap(), b"image-bytes");
        assert!(!dir.join(STAGED_PARTIAL).exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn abort_discards_partial_image() {
        let dir = scratch_dir("abort");
        let mut target = FileStagingTarget::new(dir.clone());

        target.begin(Some(4)).unwrap();
        target.write(&[1, 2]).unwrap();
        target.abort();

        assert!(!dir.join(STAGED_PARTIAL).exists());
        assert!(!dir.join(STAGED_IMAGE).exists());
        assert!(target.write(&[3]).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    fn streamed_upload(dir: PathBuf, gate: &UpdateGate, payload: &[u8]) -> Result<(), UpdateError> {
        let mut body = b"--XyZ\r\nContent-Disposition: form-data; name=\"update\"; filename=\"fw.bin\"\r\n\r\n".to_vec();
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\r\n--XyZ--\r\n");

        let (tx, rx) = mpsc::channel(body.len());
        for piece in body.chunks(7) {
            tx.blocking_send(Ok(Bytes::copy_from_slice(piece))).unwrap();
        }
        drop(tx);

        let mut target = FileStagingTarget::new(dir);
        accept_upload(
            gate,
            Some("multipart/form-data; boundary=XyZ"),
            &mut ChannelBody::new(rx),
            &mut target,
        )
        .map(|_| ())
    }

    #[test]
    fn streamed_upload_is_staged_from_split_chunks() {
        let dir = scratch_dir("streamed");
        let gate = UpdateGate::new();

        streamed_upload(dir.clone(), &gate, b"UPLOADED-IMAGE").unwrap();

        assert_eq!(fs::read(dir.join(STAGED_IMAGE)).unwrap(), b"UPLOADED-IMAGE");
        assert!(gate.restart_pending());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn staged_upload_survives_later_writers() {
        let dir = scratch_dir("staged");
        let gate = UpdateGate::new();
        streamed_upload(dir.clone(), &gate, b"UPLOADED-IMAGE").unwrap();

        // Neither the version check nor a second upload may reopen staging.
        assert!(gate.try_claim().is_none());
        assert_eq!(
            streamed_upload(dir.clone(), &gate, b"PART"),
            Err(UpdateError::Busy)
        );

        assert_eq!(fs::read(dir.join(STAGED_IMAGE)).unwrap(), b"UPLOADED-IMAGE");
        assert!(!dir.join(STAGED_PARTIAL).exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn body_stream_error_fails_the_upload() {
        let dir = scratch_dir("broken");
        let gate = UpdateGate::new();
        let (tx, rx) = mpsc::channel(2);
        tx.blocking_send(Ok(Bytes::from_static(
            b"--XyZ\r\nContent-Disposition: form-data; name=\"update\"\r\n\r\nabc",
        )))
        .unwrap();
        tx.blocking_send(Err("connection reset".to_string())).unwrap();
        drop(tx);

        let mut target = FileStagingTarget::new(dir.clone());
        let result = accept_upload(
            &gate,
            Some("multipart/form-data; boundary=XyZ"),
            &mut ChannelBody::new(rx),
            &mut target,
        );

        assert_eq!(result, Err(UpdateError::Fetch("connection reset".to_string())));
        assert!(!dir.join(STAGED_IMAGE).exists());
        assert!(gate.try_claim().is_some());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn simulated_readings_are_always_valid() {
        let mut sensor = SimulatedSensor::default();
        for _ in 0..20 {
            let sample = sensor.sample();
            assert!(sample.is_valid());
            assert!((21.0..=22.4).contains(&sample.temperature_c));
        }
    }

    #[test]
    fn loopback_link_tracks_connect_and_disconnect() {
        let mut link = LoopbackLink::default();
        assert!(!link.is_connected());

        link.connect().unwrap();
        assert!(link.is_connected());
        assert_eq!(link.address().as_deref(), Some("127.0.0.1"));

        link.disconnect();
        assert!(!link.is_connected());
    }
}
