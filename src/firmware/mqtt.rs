//! Reconnecting MQTT session on rust-mqtt over an embassy-net TCP socket.
//!
//! The session manager only queues requests; this task owns the client,
//! reconnects after a lost session until told to stop, and reports
//! connect, disconnect and inbound messages as `MqttEvent`s.
//!
//! Inbound packets are read with `receive_message_if_ready` and never raced
//! against the request queue: a read, once started, finishes.

use defmt::{debug, error, info, warn};
use embassy_futures::select::{select, Either};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Ipv4Address, Stack};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use heapless::{String, Vec};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

use ble_tracker::config::{MAX_TOPIC_LEN, TELEMETRY_MAX_LEN};
use ble_tracker::net::mqtt::{session_step, InboundChunk, MqttEvent, SessionWake};
use ble_tracker::net::{MessagingTransport, QoS, SessionConfig};
use ble_tracker::{Error, Event};

use super::EVENTS;

/// Delay before reconnecting a lost session.
const RECONNECT_DELAY_MS: u64 = 10_000;

const TCP_BUFFER_LEN: usize = 1024;
const MQTT_BUFFER_LEN: usize = 1024;

/// How often the socket is checked for inbound packets while idle.
const INBOUND_POLL_MS: u64 = 100;

/// MQTT v5 properties held per packet.
const MAX_PROPERTIES: usize = 5;

#[derive(defmt::Format)]
enum SessionRequest {
    Start(SessionConfig),
    Stop,
    Subscribe {
        topic: String<MAX_TOPIC_LEN>,
        qos: QoS,
    },
    Publish {
        topic: String<MAX_TOPIC_LEN>,
        payload: Vec<u8, TELEMETRY_MAX_LEN>,
        qos: QoS,
        retain: bool,
    },
}

/// How a session ended.
enum SessionEnd {
    Stopped,
    Restart(SessionConfig),
    Lost,
}

static REQUESTS: Channel<CriticalSectionRawMutex, SessionRequest, 6> = Channel::new();

/// [`MessagingTransport`] handed to the tracker.
pub struct BrokerLink;

impl MessagingTransport for BrokerLink {
    fn start(&mut self, config: &SessionConfig) -> Result<(), Error> {
        REQUESTS
            .try_send(SessionRequest::Start(config.clone()))
            .map_err(|_| Error::Mqtt)
    }

    fn stop(&mut self) -> Result<(), Error> {
        REQUESTS.try_send(SessionRequest::Stop).map_err(|_| Error::Mqtt)
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Error> {
        let topic = String::try_from(topic).map_err(|_| Error::BufferOverflow)?;
        REQUESTS
            .try_send(SessionRequest::Subscribe { topic, qos })
            .map_err(|_| Error::Mqtt)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), Error> {
        let topic = String::try_from(topic).map_err(|_| Error::BufferOverflow)?;
        let payload = Vec::from_slice(payload).map_err(|_| Error::BufferOverflow)?;
        REQUESTS
            .try_send(SessionRequest::Publish {
                topic,
                payload,
                qos,
                retain,
            })
            .map_err(|_| Error::Mqtt)
    }
}

fn qos_of(qos: QoS) -> QualityOfService {
    match qos {
        QoS::AtMostOnce => QualityOfService::QoS0,
        QoS::AtLeastOnce => QualityOfService::QoS1,
        QoS::ExactlyOnce => QualityOfService::QoS2,
    }
}

#[embassy_executor::task]
pub async fn session_task(stack: Stack<'static>) -> ! {
    let mut next: Option<SessionConfig> = None;
    loop {
        let config = match next.take() {
            Some(config) => config,
            None => match REQUESTS.receive().await {
                SessionRequest::Start(config) => config,
                other => {
                    debug!("mqtt: no session, dropped {}", other);
                    continue;
                }
            },
        };

        loop {
            match run_session(stack, &config).await {
                SessionEnd::Stopped => break,
                SessionEnd::Restart(config) => {
                    next = Some(config);
                    break;
                }
                SessionEnd::Lost => {
                    EVENTS.send(Event::Mqtt(MqttEvent::Disconnected)).await;
                    match wait_reconnect().await {
                        None => continue,
                        Some(SessionEnd::Restart(config)) => {
                            next = Some(config);
                            break;
                        }
                        Some(_) => break,
                    }
                }
            }
        }
    }
}

/// Sit out the reconnect delay. Start and stop requests cut it short;
/// anything else has no session to go to and is dropped.
async fn wait_reconnect() -> Option<SessionEnd> {
    let deadline = Instant::now() + Duration::from_millis(RECONNECT_DELAY_MS);
    loop {
        match select(Timer::at(deadline), REQUESTS.receive()).await {
            Either::First(()) => return None,
            Either::Second(SessionRequest::Start(config)) => return Some(SessionEnd::Restart(config)),
            Either::Second(SessionRequest::Stop) => return Some(SessionEnd::Stopped),
            Either::Second(other) => debug!("mqtt: reconnecting, dropped {}", other),
        }
    }
}

async fn resolve(stack: Stack<'static>, host: &str) -> Option<IpAddress> {
    if let Ok(ip) = host.parse::<Ipv4Address>() {
        return Some(IpAddress::Ipv4(ip));
    }
    match stack.dns_query(host, DnsQueryType::A).await {
        Ok(addrs) => addrs.first().copied(),
        Err(e) => {
            warn!("mqtt: DNS lookup of {} failed {:?}", host, defmt::Debug2Format(&e));
            None
        }
    }
}

async fn run_session(stack: Stack<'static>, config: &SessionConfig) -> SessionEnd {
    let Some(remote) = resolve(stack, config.host).await else {
        return SessionEnd::Lost;
    };

    let mut rx = [0u8; TCP_BUFFER_LEN];
    let mut tx = [0u8; TCP_BUFFER_LEN];
    let mut socket = TcpSocket::new(stack, &mut rx, &mut tx);
    socket.set_timeout(Some(Duration::from_secs(config.keep_alive_secs as u64 + 10)));
    if let Err(e) = socket.connect((remote, config.port)).await {
        warn!("mqtt: TCP connect to {}:{} failed {:?}", config.host, config.port, e);
        return SessionEnd::Lost;
    }

    // clean start is always set by rust-mqtt 0.3; config.clean_session cannot be honoured.
    let mut client_config: ClientConfig<'_, MAX_PROPERTIES, _> =
        ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20_000));
    client_config.add_client_id(config.client_id.as_str());
    client_config.keep_alive = config.keep_alive_secs;
    if !config.username.is_empty() {
        client_config.add_username(config.username);
        client_config.add_password(config.password);
    }
    client_config.add_will(
        config.last_will.topic,
        config.last_will.message,
        config.last_will.retain,
    );

    let mut recv_buf = [0u8; MQTT_BUFFER_LEN];
    let mut write_buf = [0u8; MQTT_BUFFER_LEN];
    let mut client = MqttClient::<_, MAX_PROPERTIES, _>::new(
        socket,
        &mut write_buf,
        MQTT_BUFFER_LEN,
        &mut recv_buf,
        MQTT_BUFFER_LEN,
        client_config,
    );
    if let Err(e) = client.connect_to_broker().await {
        error!("mqtt: broker refused connection {:?}", defmt::Debug2Format(&e));
        return SessionEnd::Lost;
    }
    info!("mqtt: connected to {}:{}", config.host, config.port);
    EVENTS.send(Event::Mqtt(MqttEvent::Connected)).await;

    let ping_period = Duration::from_secs((config.keep_alive_secs / 2).max(1) as u64);
    let mut next_ping = Instant::now() + ping_period;
    let mut msg_id: u16 = 0;

    loop {
        let inbound = async { client.receive_message_if_ready().await.transpose() };
        let idle = Timer::at(next_ping.min(Instant::now() + Duration::from_millis(INBOUND_POLL_MS)));
        match session_step(inbound, REQUESTS.receive(), idle).await {
            SessionWake::Inbound(Ok((topic, payload))) => {
                match InboundChunk::new(topic.as_bytes(), payload, 0, payload.len()) {
                    Ok(chunk) => EVENTS.send(Event::Mqtt(MqttEvent::Data(chunk))).await,
                    Err(_) => warn!("mqtt: message on {} too large ({} bytes)", topic, payload.len()),
                }
            }
            SessionWake::Inbound(Err(e)) => {
                warn!("mqtt: session lost {:?}", defmt::Debug2Format(&e));
                return SessionEnd::Lost;
            }
            SessionWake::Request(SessionRequest::Start(next)) => {
                let _ = client.disconnect().await;
                return SessionEnd::Restart(next);
            }
            SessionWake::Request(SessionRequest::Stop) => {
                let _ = client.disconnect().await;
                return SessionEnd::Stopped;
            }
            SessionWake::Request(SessionRequest::Subscribe { topic, qos }) => {
                if let Err(e) = client.subscribe_to_topic(&topic).await {
                    error!("mqtt: subscribe to {} ({}) failed {:?}", topic.as_str(), qos, defmt::Debug2Format(&e));
                    return SessionEnd::Lost;
                }
                msg_id = msg_id.wrapping_add(1);
                EVENTS.send(Event::Mqtt(MqttEvent::Subscribed { msg_id })).await;
            }
            SessionWake::Request(SessionRequest::Publish {
                topic,
                payload,
                qos,
                retain,
            }) => match client.send_message(&topic, &payload, qos_of(qos), retain).await {
                Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => {
                    if qos != QoS::AtMostOnce {
                        msg_id = msg_id.wrapping_add(1);
                        EVENTS.send(Event::Mqtt(MqttEvent::Published { msg_id })).await;
                    }
                }
                Err(e) => {
                    warn!("mqtt: publish to {} failed {:?}", topic.as_str(), defmt::Debug2Format(&e));
                    return SessionEnd::Lost;
                }
            },
            SessionWake::Idle => {}
        }

        if Instant::now() >= next_ping {
            if let Err(e) = client.send_ping().await {
                warn!("mqtt: ping failed {:?}", defmt::Debug2Format(&e));
                return SessionEnd::Lost;
            }
            next_ping = Instant::now() + ping_period;
        }
    }
}
