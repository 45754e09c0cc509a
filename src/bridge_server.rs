//! WebSocket bridge server.
//!
//! Accepts clients on `/kinect`, tracks per-client stream subscriptions,
//! and broadcasts cached frames at the camera's native 30 Hz cadence. The
//! broadcaster packs each stream's frame once per tick and fans the same
//! buffer out to every subscriber; a client that cannot keep up is dropped
//! by its own connection task, never stalling the tick.
//!
//! Motor and LED commands ride the same socket as JSON text messages and
//! are executed against the device (or the simulated motor in mock mode)
//! with a global 500 ms rate limit on tilt-state changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::{
    DeviceError, MotorReading, TiltStatus, FRAME_INTERVAL_MS, MOTOR_RATE_LIMIT_MS,
    TILT_MAX_DEGREES, TILT_MIN_DEGREES,
};
use crate::frame_cache::FrameCache;
use crate::mock::{synth_color, synth_depth, synth_timestamp};
use crate::protocol::{
    emit_server_message, error_code, pack_frame, parse_client_message, Capabilities,
    ClientMessage, LedState, ServerMessage, StreamType, PROTOCOL_VERSION, SERVER_NAME,
};

/// Interval between statistics log lines.
const STATS_WINDOW: Duration = Duration::from_secs(10);

struct ClientHandle {
    tx: mpsc::UnboundedSender<Message>,
    subscribed_color: bool,
    subscribed_depth: bool,
}

/// The motor subdevice as seen by the control channel: the real device, a
/// simulated record in mock mode, or nothing at all.
enum MotorController {
    #[cfg(feature = "freenect")]
    Device(Arc<crate::kinect::KinectSession>),
    Mock(Mutex<MockMotor>),
    /// Motor subdevice absent or failed to open.
    #[allow(dead_code)]
    Disconnected,
}

struct MockMotor {
    angle: f64,
}

/// Counters for the periodic statistics line. All atomic; the broadcaster
/// and connection tasks update them without coordination.
#[derive(Default)]
struct Stats {
    frames_sent: AtomicU64,
    dropped_frames: AtomicU64,
    color_sent: AtomicU64,
    depth_sent: AtomicU64,
}

/// Shared state behind every connection task and the broadcaster.
pub struct ServerState {
    cache: Arc<FrameCache>,
    clients: Mutex<HashMap<u64, ClientHandle>>,
    next_client_id: AtomicU64,
    mock: bool,
    motor: MotorController,
    /// Instant of the last accepted tilt-state-changing command.
    motor_quantum: Mutex<Option<Instant>>,
    stats: Stats,
    #[cfg(feature = "freenect")]
    device: Option<Arc<crate::kinect::KinectSession>>,
}

impl ServerState {
    fn new_mock() -> Self {
        Self {
            cache: Arc::new(FrameCache::new()),
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            mock: true,
            motor: MotorController::Mock(Mutex::new(MockMotor { angle: 0.0 })),
            motor_quantum: Mutex::new(None),
            stats: Stats::default(),
            #[cfg(feature = "freenect")]
            device: None,
        }
    }

    #[cfg(feature = "freenect")]
    fn new_device(session: Arc<crate::kinect::KinectSession>) -> Self {
        Self {
            cache: Arc::new(FrameCache::new()),
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            mock: false,
            motor: MotorController::Device(session.clone()),
            motor_quantum: Mutex::new(None),
            stats: Stats::default(),
            device: Some(session),
        }
    }

    fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    fn add_client(&self, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().unwrap().insert(
            id,
            ClientHandle {
                tx,
                subscribed_color: false,
                subscribed_depth: false,
            },
        );
        id
    }

    fn remove_client(&self, id: u64) {
        self.clients.lock().unwrap().remove(&id);
    }

    /// Start device streams when the first observer arrives. Mock mode
    /// draws frames inside the tick instead, so there is nothing to start.
    fn maybe_start_streams(&self) {
        #[cfg(feature = "freenect")]
        if let Some(device) = &self.device {
            match device.start_streams() {
                Ok(()) | Err(DeviceError::AlreadyStreaming) => {}
                Err(e) => warn!("failed to start device streams: {e}"),
            }
        }
    }

    /// Stop device streams when the last observer leaves.
    fn maybe_stop_streams(&self) {
        #[cfg(feature = "freenect")]
        if let Some(device) = &self.device {
            match device.stop_streams() {
                Ok(()) | Err(DeviceError::NotStreaming) => {}
                Err(e) => warn!("failed to stop device streams: {e}"),
            }
        }
    }

    /// One tilt-state-changing command per quantum, server-wide.
    fn claim_motor_quantum(&self) -> bool {
        let mut last = self.motor_quantum.lock().unwrap();
        let now = Instant::now();
        match *last {
            Some(prev) if now - prev < Duration::from_millis(MOTOR_RATE_LIMIT_MS) => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    fn motor_reading(&self) -> Result<MotorReading, DeviceError> {
        match &self.motor {
            #[cfg(feature = "freenect")]
            MotorController::Device(session) => session.motor_status(),
            MotorController::Mock(motor) => {
                let motor = motor.lock().unwrap();
                Ok(MotorReading {
                    angle: motor.angle,
                    status: TiltStatus::Stopped,
                    accelerometer: Default::default(),
                })
            }
            MotorController::Disconnected => Err(DeviceError::NotInitialized),
        }
    }

    fn motor_set_tilt(&self, angle: f64) -> Result<(), DeviceError> {
        match &self.motor {
            #[cfg(feature = "freenect")]
            MotorController::Device(session) => session.set_tilt(angle),
            MotorController::Mock(motor) => {
                motor.lock().unwrap().angle = angle.clamp(TILT_MIN_DEGREES, TILT_MAX_DEGREES);
                Ok(())
            }
            MotorController::Disconnected => Err(DeviceError::NotInitialized),
        }
    }

    fn motor_set_led(&self, led: LedState) -> Result<(), DeviceError> {
        match &self.motor {
            #[cfg(feature = "freenect")]
            MotorController::Device(session) => session.set_led(led),
            // The simulated motor accepts any valid LED state.
            MotorController::Mock(_) => {
                debug!(?led, "mock led set");
                Ok(())
            }
            MotorController::Disconnected => Err(DeviceError::NotInitialized),
        }
    }
}

fn hello_message() -> ServerMessage {
    ServerMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        server: SERVER_NAME.to_string(),
        capabilities: Capabilities::current(),
    }
}

fn status_message(state: &ServerState) -> ServerMessage {
    ServerMessage::Status {
        connected: true,
        frame_id: state.cache.frame_id(),
        dropped_frames: state.stats.dropped_frames.load(Ordering::Relaxed),
        clients: state.client_count() as u32,
    }
}

/// Send a status update to every connected client; used when the client
/// count changes.
fn broadcast_status(state: &ServerState) {
    let text = emit_server_message(&status_message(state));
    let clients = state.clients.lock().unwrap();
    for client in clients.values() {
        let _ = client.tx.send(Message::Text(text.clone().into()));
    }
}

fn motor_status_reply(state: &ServerState) -> ServerMessage {
    match state.motor_reading() {
        Ok(reading) => ServerMessage::MotorStatus {
            angle: reading.angle,
            status: reading.status.as_wire().to_string(),
            accelerometer: reading.accelerometer.into(),
        },
        Err(e) => ServerMessage::MotorError {
            code: error_code::MOTOR_FAILED.to_string(),
            message: e.to_string(),
        },
    }
}

fn motor_disconnected() -> ServerMessage {
    ServerMessage::MotorError {
        code: error_code::DEVICE_NOT_CONNECTED.to_string(),
        message: "no motor subdevice available".to_string(),
    }
}

/// Execute a tilt-state-changing command under the global rate limit and
/// read status back on success.
fn tilt_command(state: &ServerState, angle: f64) -> ServerMessage {
    if matches!(state.motor, MotorController::Disconnected) {
        return motor_disconnected();
    }
    if !state.claim_motor_quantum() {
        return ServerMessage::MotorError {
            code: error_code::RATE_LIMITED.to_string(),
            message: format!("at most one motor command per {MOTOR_RATE_LIMIT_MS} ms"),
        };
    }
    match state.motor_set_tilt(angle) {
        Ok(()) => motor_status_reply(state),
        Err(e) => ServerMessage::MotorError {
            code: error_code::MOTOR_FAILED.to_string(),
            message: e.to_string(),
        },
    }
}

/// Handle one text message from `client_id`, returning the replies owed to
/// that client. Subscription changes reply with nothing; the next tick
/// delivers.
fn handle_text_message(state: &ServerState, client_id: u64, text: &str) -> Vec<ServerMessage> {
    let msg = match parse_client_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            return vec![ServerMessage::Error {
                code: error_code::PROTOCOL_ERROR.to_string(),
                message: e.message,
                recoverable: true,
            }];
        }
    };

    match msg {
        ClientMessage::Subscribe { streams } => {
            // Replace semantics; unknown stream names are ignored so newer
            // clients can ask for streams this server does not have yet.
            let color = streams.iter().any(|s| s == StreamType::Color.name());
            let depth = streams.iter().any(|s| s == StreamType::Depth.name());
            let mut clients = state.clients.lock().unwrap();
            if let Some(client) = clients.get_mut(&client_id) {
                client.subscribed_color = color;
                client.subscribed_depth = depth;
            }
            debug!(client_id, color, depth, "subscription updated");
            vec![]
        }
        ClientMessage::Unsubscribe => {
            let mut clients = state.clients.lock().unwrap();
            if let Some(client) = clients.get_mut(&client_id) {
                client.subscribed_color = false;
                client.subscribed_depth = false;
            }
            vec![]
        }
        ClientMessage::MotorSetTilt { angle } => vec![tilt_command(state, angle)],
        ClientMessage::MotorReset => vec![tilt_command(state, 0.0)],
        ClientMessage::MotorSetLed { state: led_name } => {
            let Some(led) = LedState::from_wire(&led_name) else {
                return vec![ServerMessage::MotorError {
                    code: error_code::INVALID_LED_STATE.to_string(),
                    message: format!("unknown LED state {led_name:?}"),
                }];
            };
            if matches!(state.motor, MotorController::Disconnected) {
                return vec![motor_disconnected()];
            }
            match state.motor_set_led(led) {
                Ok(()) => vec![motor_status_reply(state)],
                Err(e) => vec![ServerMessage::MotorError {
                    code: error_code::MOTOR_FAILED.to_string(),
                    message: e.to_string(),
                }],
            }
        }
        ClientMessage::MotorGetStatus => {
            if matches!(state.motor, MotorController::Disconnected) {
                return vec![motor_disconnected()];
            }
            vec![motor_status_reply(state)]
        }
    }
}

/// One broadcast tick: refresh mock frames, snapshot the cache, pack each
/// valid stream once, and send to its subscribers.
fn broadcast_tick(state: &ServerState) {
    if state.mock {
        let frame_id = state.cache.frame_id().wrapping_add(1);
        let ts = synth_timestamp(frame_id);
        state.cache.write_color(&synth_color(frame_id), ts);
        state.cache.write_depth(&synth_depth(frame_id), ts);
    }

    let snap = state.cache.snapshot();

    let color = snap
        .color
        .map(|frame| pack_frame(snap.frame_id, StreamType::Color, &frame.data));
    let depth = snap
        .depth
        .map(|frame| pack_frame(snap.frame_id, StreamType::Depth, &frame.data));

    let clients = state.clients.lock().unwrap();
    for client in clients.values() {
        if client.subscribed_color {
            if let Some(buf) = &color {
                if client.tx.send(Message::Binary(buf.clone())).is_ok() {
                    state.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                    state.stats.color_sent.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if client.subscribed_depth {
            if let Some(buf) = &depth {
                if client.tx.send(Message::Binary(buf.clone())).is_ok() {
                    state.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                    state.stats.depth_sent.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// The 30 Hz broadcast loop. Deadlines are absolute; when the wall clock
/// has run past the next slot (suspension, debugger, load), the missed
/// slots are counted as drops and the schedule resynchronizes.
async fn broadcast_loop(state: Arc<ServerState>, cancel: CancellationToken) {
    let interval = Duration::from_millis(FRAME_INTERVAL_MS);
    let mut next = Instant::now() + interval;
    let mut last_stats = Instant::now();
    let mut last_color = 0u64;
    let mut last_depth = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(next) => {}
        }

        broadcast_tick(&state);

        next += interval;
        let now = Instant::now();
        if next <= now {
            let missed = ((now - next).as_millis() as u64) / FRAME_INTERVAL_MS + 1;
            state
                .stats
                .dropped_frames
                .fetch_add(missed, Ordering::Relaxed);
            debug!(missed, "broadcast deadline overrun, resynchronizing");
            next = now + interval;
        }

        if now - last_stats >= STATS_WINDOW {
            let color = state.stats.color_sent.load(Ordering::Relaxed);
            let depth = state.stats.depth_sent.load(Ordering::Relaxed);
            let secs = (now - last_stats).as_secs_f64();
            let color_fps = (color - last_color) as f64 / secs;
            let depth_fps = (depth - last_depth) as f64 / secs;
            info!(
                color_fps,
                depth_fps,
                frames_sent = state.stats.frames_sent.load(Ordering::Relaxed),
                dropped_frames = state.stats.dropped_frames.load(Ordering::Relaxed),
                clients = state.client_count(),
                "broadcast statistics"
            );
            last_color = color;
            last_depth = depth;
            last_stats = now;
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_task(socket, state))
}

/// Per-connection task: one loop multiplexing the outbound queue and the
/// inbound socket, so the broadcaster never awaits this client's socket.
async fn client_task(mut socket: WebSocket, state: Arc<ServerState>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client_id = state.add_client(tx.clone());
    info!(client_id, clients = state.client_count(), "client connected");

    if state.client_count() == 1 {
        state.maybe_start_streams();
    }

    let _ = tx.send(Message::Text(emit_server_message(&hello_message()).into()));
    broadcast_status(&state);

    loop {
        tokio::select! {
            queued = rx.recv() => {
                let Some(msg) = queued else { break };
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    Message::Text(text) => {
                        for reply in handle_text_message(&state, client_id, text.as_str()) {
                            let _ = tx.send(Message::Text(emit_server_message(&reply).into()));
                        }
                    }
                    Message::Close(_) => break,
                    // Binary uploads and pings are ignored; axum answers
                    // pings at the protocol layer.
                    _ => {}
                }
            }
        }
    }

    state.remove_client(client_id);
    info!(client_id, clients = state.client_count(), "client disconnected");
    if state.client_count() == 0 {
        state.maybe_stop_streams();
    }
    broadcast_status(&state);
}

/// The bridge server: owns the shared state, the listener, and the
/// broadcast task.
pub struct BridgeServer {
    state: Arc<ServerState>,
    cancel: CancellationToken,
    broadcast: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl BridgeServer {
    /// Build a mock-mode server; frames are synthesized, the motor is
    /// simulated, and no hardware is touched.
    pub fn new_mock() -> Self {
        Self {
            state: Arc::new(ServerState::new_mock()),
            cancel: CancellationToken::new(),
            broadcast: None,
            listener: None,
        }
    }

    /// Build a server bound to the real camera. Fails fast when no device
    /// is attached or the open fails; streams start lazily with the first
    /// client.
    #[cfg(feature = "freenect")]
    pub fn new_device() -> Result<Self, DeviceError> {
        use crate::device::DeviceConfig;
        use crate::kinect::{device_count, KinectSession};

        if device_count() == 0 {
            return Err(DeviceError::DeviceNotFound);
        }
        let session = Arc::new(KinectSession::new());
        session.initialize(DeviceConfig::default())?;

        let state = Arc::new(ServerState::new_device(session.clone()));
        let cache = state.cache.clone();
        session.set_color_callback(Box::new({
            let cache = cache.clone();
            move |data, ts| cache.write_color(data, ts)
        }));
        session.set_depth_callback(Box::new(move |data, ts| cache.write_depth(data, ts)));

        Ok(Self {
            state,
            cancel: CancellationToken::new(),
            broadcast: None,
            listener: None,
        })
    }

    /// Bind the listener and spawn the broadcast task. A second call while
    /// running fails.
    pub async fn start(&mut self, port: u16) -> anyhow::Result<()> {
        if self.listener.is_some() {
            anyhow::bail!("bridge server is already running");
        }
        if port == 0 {
            anyhow::bail!("port 0 is not a valid bridge port");
        }

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, mock = self.state.mock, "bridge server listening");

        let app = Router::new()
            .route("/kinect", get(ws_handler))
            .with_state(self.state.clone());

        let cancel = self.cancel.clone();
        self.listener = Some(tokio::spawn(async move {
            let shutdown = cancel.clone();
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                warn!("bridge listener failed: {e}");
            }
        }));

        self.broadcast = Some(tokio::spawn(broadcast_loop(
            self.state.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Stop the broadcaster first, then the listener, then device streams.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.broadcast.take() {
            let _ = task.await;
        }
        if let Some(task) = self.listener.take() {
            let _ = task.await;
        }
        self.state.maybe_stop_streams();
        info!("bridge server stopped");
    }
}
