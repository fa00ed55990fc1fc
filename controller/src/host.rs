use std::{
    io::ErrorKind as IoErrorKind,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use poolctl_common::{
    state_topic, BootConfig, ControllerStatus, Devices, ErrorKind,
    ModeController, OperationMode, Property, Relay, RelayActuator, StateObserver,
    TemperatureProvider, TOPIC_CMD_PREFIX, TOPIC_CMD_WILDCARD, TOPIC_SENSOR_POOL_TEMP,
    TOPIC_SENSOR_SOLAR_TEMP, TOPIC_STATE_ERROR, TOPIC_STATE_STATUS,
};

use crate::{
    sntp::{self, NetworkClock},
    storage::HostBackend,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
/// Readings older than this count as a failed probe.
const READING_MAX_AGE: Duration = Duration::from_secs(5 * 60);
const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Requests for the control task, which is the only writer of controller
/// state.
#[derive(Debug, Clone, PartialEq)]
enum ControlMessage {
    SetProperty { name: String, value: String },
    Relay { relay: Relay, on: bool },
}

#[derive(Debug, Clone, PartialEq)]
enum Inbound {
    PoolTemp(f32),
    SolarTemp(f32),
    Control(ControlMessage),
}

/// Everything published to the broker.
#[derive(Debug, Clone)]
enum Outbound {
    Mode(OperationMode),
    Relay(Relay, bool),
    Error(ErrorKind),
    Rejected(String),
    Property(Property, String),
    Status(ControllerStatus),
}

impl Outbound {
    /// Topic, payload and retain flag.
    fn render(&self) -> anyhow::Result<(String, Vec<u8>, bool)> {
        Ok(match self {
            Self::Mode(mode) => (state_topic("mode"), mode.as_str().into(), true),
            Self::Relay(relay, on) => (
                state_topic(relay.as_str()),
                if *on { "on" } else { "off" }.into(),
                true,
            ),
            Self::Error(kind) => (TOPIC_STATE_ERROR.to_string(), kind.as_str().into(), false),
            Self::Rejected(message) => (TOPIC_STATE_ERROR.to_string(), message.clone().into(), false),
            Self::Property(property, value) => {
                (state_topic(property.as_str()), value.clone().into(), true)
            }
            Self::Status(status) => (
                TOPIC_STATE_STATUS.to_string(),
                serde_json::to_vec(status).context("status serialization failed")?,
                true,
            ),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f32,
    at: Instant,
}

/// Last temperature received over MQTT for one probe.
#[derive(Debug, Clone, Default)]
struct MqttProbe {
    latest: Arc<Mutex<Option<Sample>>>,
}

impl MqttProbe {
    fn update(&self, value: f32) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(Sample {
                value,
                at: Instant::now(),
            });
        }
    }

    fn value_at(&self, now: Instant) -> f32 {
        let Some(sample) = self.latest.lock().ok().and_then(|latest| *latest) else {
            return f32::NAN;
        };
        if now.saturating_duration_since(sample.at) > READING_MAX_AGE {
            return f32::NAN;
        }
        sample.value
    }
}

impl TemperatureProvider for MqttProbe {
    fn read(&mut self) -> f32 {
        self.value_at(Instant::now())
    }
}

/// Relay without hardware behind it; its state is only published.
#[derive(Debug, Clone, Default)]
struct SimulatedRelay {
    on: Arc<AtomicBool>,
}

impl RelayActuator for SimulatedRelay {
    fn set_on(&mut self, on: bool) {
        self.on.store(on, Ordering::Relaxed);
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

/// Forwards observer events to the publish task.
struct MqttObserver {
    outbound: mpsc::UnboundedSender<Outbound>,
}

fn publish(outbound: &mpsc::UnboundedSender<Outbound>, message: Outbound) {
    if let Err(mpsc::error::SendError(message)) = outbound.send(message) {
        debug!("publish task gone, dropping {message:?}");
    }
}

impl MqttObserver {
    fn send(&self, message: Outbound) {
        publish(&self.outbound, message);
    }
}

impl StateObserver for MqttObserver {
    fn on_mode_changed(&mut self, mode: OperationMode) {
        self.send(Outbound::Mode(mode));
    }

    fn on_relay_changed(&mut self, relay: Relay, on: bool) {
        self.send(Outbound::Relay(relay, on));
    }

    fn on_error(&mut self, kind: ErrorKind) {
        self.send(Outbound::Error(kind));
    }
}

type Controller = ModeController<HostBackend, NetworkClock>;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("POOLCTL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.poolctl/boot.json"));
    let mut boot = load_boot_config(&config_path).await.unwrap_or_else(|err| {
        warn!("failed to load boot config from {}: {err:#}", config_path.display());
        BootConfig::default()
    });
    apply_env_overrides(&mut boot, |name| std::env::var(name).ok());
    boot.sanitize();

    let data_dir = std::env::var("POOLCTL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.poolctl"));
    let backend = HostBackend::open(&boot.storage, &data_dir)
        .with_context(|| format!("failed to open storage in {}", data_dir.display()))?;

    let network = NetworkClock::default();
    if !sntp::sync_once(&boot.ntp_server, &network).await {
        warn!("starting without network time, timer window stays closed until sync");
    }
    sntp::spawn_refresh(boot.ntp_server.clone(), network.clone());

    let mut mqtt_options =
        MqttOptions::new(boot.mqtt.client_id.clone(), boot.mqtt.host.clone(), boot.mqtt.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !boot.mqtt.user.is_empty() {
        mqtt_options.set_credentials(boot.mqtt.user.clone(), boot.mqtt.pass.clone());
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let pool_probe = MqttProbe::default();
    let solar_probe = MqttProbe::default();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::channel(32);

    let devices = Devices {
        pool_sensor: Box::new(pool_probe.clone()),
        solar_sensor: Box::new(solar_probe.clone()),
        pool_pump: Box::new(SimulatedRelay::default()),
        solar_pump: Box::new(SimulatedRelay::default()),
        observer: Box::new(MqttObserver {
            outbound: outbound_tx.clone(),
        }),
    };
    let controller = ModeController::new(&boot, backend, network, devices);

    subscribe_topics(&mqtt).await?;
    spawn_mqtt_loop(eventloop, control_tx, pool_probe, solar_probe);
    spawn_publish_loop(mqtt.clone(), outbound_rx);

    info!(
        "pool controller running, control interval {}s",
        boot.control_interval_secs
    );
    control_loop(controller, control_rx, outbound_tx).await;

    if let Err(err) = mqtt.disconnect().await {
        warn!("mqtt disconnect failed: {err}");
    }
    Ok(())
}

async fn load_boot_config(path: &std::path::Path) -> anyhow::Result<BootConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice::<BootConfig>(&raw)?),
        Err(err) if err.kind() == IoErrorKind::NotFound => Ok(BootConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(boot: &mut BootConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("MQTT_HOST") {
        boot.mqtt.host = host;
    }
    if let Some(port) = var("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        boot.mqtt.port = port;
    }
    if let Some(user) = var("MQTT_USER") {
        boot.mqtt.user = user;
    }
    if let Some(pass) = var("MQTT_PASS") {
        boot.mqtt.pass = pass;
    }
    if let Some(server) = var("NTP_SERVER") {
        boot.ntp_server = server;
    }
    if let Some(secs) = var("POOLCTL_INTERVAL_SECS").and_then(|value| value.parse::<u32>().ok()) {
        boot.control_interval_secs = secs;
    }
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_POOL_TEMP,
        TOPIC_SENSOR_SOLAR_TEMP,
        TOPIC_CMD_WILDCARD,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn parse_switch(payload: &str) -> Option<bool> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_inbound(topic: &str, payload: &[u8]) -> anyhow::Result<Option<Inbound>> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(None);
    }
    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;

    let inbound = match topic {
        TOPIC_SENSOR_POOL_TEMP | TOPIC_SENSOR_SOLAR_TEMP => {
            // Unparsable or implausible readings are forwarded as NaN so the
            // controller sees the probe as failed instead of using stale data.
            let temp = message
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|temp| temp.is_finite() && (-40.0..=150.0).contains(temp))
                .unwrap_or(f32::NAN);
            if topic == TOPIC_SENSOR_POOL_TEMP {
                Inbound::PoolTemp(temp)
            } else {
                Inbound::SolarTemp(temp)
            }
        }
        _ => {
            let Some(name) = topic.strip_prefix(TOPIC_CMD_PREFIX) else {
                return Ok(None);
            };
            let relay = [Relay::PoolPump, Relay::SolarPump]
                .into_iter()
                .find(|relay| relay.as_str() == name);
            match relay {
                Some(relay) => {
                    let on = parse_switch(message)
                        .with_context(|| format!("invalid switch value `{message}`"))?;
                    Inbound::Control(ControlMessage::Relay { relay, on })
                }
                None => Inbound::Control(ControlMessage::SetProperty {
                    name: name.to_string(),
                    value: message.to_string(),
                }),
            }
        }
    };
    Ok(Some(inbound))
}

fn spawn_mqtt_loop(
    mut eventloop: rumqttc::EventLoop,
    control: mpsc::Sender<ControlMessage>,
    pool_probe: MqttProbe,
    solar_probe: MqttProbe,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    match parse_inbound(&message.topic, &message.payload) {
                        Ok(Some(Inbound::PoolTemp(temp))) => pool_probe.update(temp),
                        Ok(Some(Inbound::SolarTemp(temp))) => solar_probe.update(temp),
                        Ok(Some(Inbound::Control(request))) => {
                            if control.send(request).await.is_err() {
                                info!("control task stopped, leaving mqtt loop");
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => warn!("mqtt message handling error: {err:#}"),
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_publish_loop(mqtt: AsyncClient, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let (topic, payload, retain) = match message.render() {
                Ok(rendered) => rendered,
                Err(err) => {
                    warn!("{err:#}");
                    continue;
                }
            };
            if let Err(err) = mqtt.publish(&topic, QoS::AtLeastOnce, retain, payload).await {
                warn!("publish to {topic} failed: {err}");
            }
        }
    });
}

fn publish_settings(controller: &Controller, outbound: &mpsc::UnboundedSender<Outbound>) {
    for property in Property::ALL {
        publish(
            outbound,
            Outbound::Property(property, controller.property_value(property)),
        );
    }
}

fn handle_control_message(
    controller: &mut Controller,
    message: ControlMessage,
    outbound: &mpsc::UnboundedSender<Outbound>,
) {
    let result = match &message {
        ControlMessage::SetProperty { name, value } => controller
            .apply_property(name, value)
            .map(|()| Property::parse(name)),
        ControlMessage::Relay { relay, on } => {
            controller.command_relay(*relay, *on).map(|()| None)
        }
    };

    match result {
        Ok(Some(property)) => {
            publish(
                outbound,
                Outbound::Property(property, controller.property_value(property)),
            );
        }
        Ok(None) => {}
        Err(err) => {
            publish(outbound, Outbound::Rejected(err.to_string()));
        }
    }
}

async fn control_loop(
    mut controller: Controller,
    mut control: mpsc::Receiver<ControlMessage>,
    outbound: mpsc::UnboundedSender<Outbound>,
) {
    publish_settings(&controller, &outbound);
    publish(&outbound, Outbound::Mode(controller.mode()));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(TICK_PERIOD);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        // External changes land before the cycle they may force.
        let mut changed = false;
        while let Ok(message) = control.try_recv() {
            debug!("control message: {message:?}");
            handle_control_message(&mut controller, message, &outbound);
            changed = true;
        }

        if controller.run_cycle(monotonic_ms()) || changed {
            publish(&outbound, Outbound::Status(controller.status()));
        }
    }
}

/// Milliseconds since start on a wrapping 32-bit counter, like a
/// microcontroller's `millis()`.
fn monotonic_ms() -> u32 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}
