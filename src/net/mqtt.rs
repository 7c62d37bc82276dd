//! MQTT session manager.
//!
//! Owns start/stop of the broker session, flips the session flag on the
//! transport's connect/disconnect callbacks, subscribes to the control topic
//! and routes control payloads to the firmware updater. Reconnection is the
//! transport's job; this layer never retries on its own.

use core::ffi::CStr;
use core::future::Future;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Vec;

use crate::config::{
    Settings, FOTA_TOPIC, LWT_MESSAGE, LWT_TOPIC, MAX_CONTROL_PAYLOAD_LEN, MAX_INBOUND_LEN,
    MAX_TOPIC_LEN, MQTT_CLEAN_SESSION, MQTT_KEEPALIVE_SECS, TELEMETRY_TOPIC,
};
use crate::connectivity::Connectivity;
use crate::error::Error;
use crate::fota::FirmwareUpdate;
use crate::net::wifi::ClientId;
use crate::net::MessagingTransport;

/// MQTT quality of service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    /// QoS 0 - At most once
    AtMostOnce,
    /// QoS 1 - At least once
    AtLeastOnce,
    /// QoS 2 - Exactly once
    ExactlyOnce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LastWill {
    pub topic: &'static str,
    pub message: &'static [u8],
    pub qos: QoS,
    pub retain: bool,
}

/// Everything the transport needs to open a session.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionConfig {
    pub host: &'static str,
    pub port: u16,
    pub client_id: ClientId,
    pub username: &'static str,
    pub password: &'static str,
    pub clean_session: bool,
    pub keep_alive_secs: u16,
    pub last_will: LastWill,
}

/// One chunk of an inbound message, as delivered by the transport.
///
/// Topic and payload are length-delimited, not NUL-terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InboundChunk {
    pub topic: Vec<u8, MAX_INBOUND_LEN>,
    pub payload: Vec<u8, MAX_INBOUND_LEN>,
    /// Offset of this chunk within the whole message.
    pub offset: usize,
    pub total_len: usize,
}

impl InboundChunk {
    pub fn new(topic: &[u8], payload: &[u8], offset: usize, total_len: usize) -> Result<Self, Error> {
        Ok(Self {
            topic: Vec::from_slice(topic).map_err(|_| Error::BufferOverflow)?,
            payload: Vec::from_slice(payload).map_err(|_| Error::BufferOverflow)?,
            offset,
            total_len,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttEvent {
    Connected,
    Disconnected,
    Subscribed { msg_id: u16 },
    Published { msg_id: u16 },
    Data(InboundChunk),
}

/// Owned, NUL-terminated copy of an inbound control message.
pub struct ControlMessage {
    topic: [u8; MAX_TOPIC_LEN + 1],
    topic_len: usize,
    payload: [u8; MAX_CONTROL_PAYLOAD_LEN + 1],
    payload_len: usize,
}

impl ControlMessage {
    /// Copy topic and payload, appending terminators.
    ///
    /// Fails on anything over its bound or on a payload with an interior
    /// NUL, which the C view would silently cut short.
    pub fn copy_from(topic: &[u8], payload: &[u8]) -> Result<Self, Error> {
        if topic.len() > MAX_TOPIC_LEN || payload.len() > MAX_CONTROL_PAYLOAD_LEN {
            return Err(Error::BufferOverflow);
        }
        if payload.contains(&0) {
            return Err(Error::InvalidPayload);
        }
        let mut msg = Self {
            topic: [0; MAX_TOPIC_LEN + 1],
            topic_len: topic.len(),
            payload: [0; MAX_CONTROL_PAYLOAD_LEN + 1],
            payload_len: payload.len(),
        };
        msg.topic[..topic.len()].copy_from_slice(topic);
        msg.payload[..payload.len()].copy_from_slice(payload);
        Ok(msg)
    }

    pub fn topic(&self) -> &[u8] {
        &self.topic[..self.topic_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len]
    }

    pub fn payload_c_str(&self) -> &CStr {
        // Terminated at `payload_len`, no interior NUL.
        CStr::from_bytes_until_nul(&self.payload).unwrap_or_default()
    }
}

pub struct SessionManager {
    settings: Settings,
    active: bool,
    published: u32,
    dropped: u32,
    routed: u32,
}

impl SessionManager {
    pub const fn new(settings: Settings) -> Self {
        Self {
            settings,
            active: false,
            published: 0,
            dropped: 0,
            routed: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Telemetry records handed to the transport.
    pub fn published(&self) -> u32 {
        self.published
    }

    /// Telemetry records dropped while the session was down.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Control payloads routed to the firmware updater.
    pub fn routed(&self) -> u32 {
        self.routed
    }

    pub fn session_config(&self, client_id: ClientId) -> SessionConfig {
        SessionConfig {
            host: self.settings.mqtt_host,
            port: self.settings.mqtt_port,
            client_id,
            username: self.settings.mqtt_username,
            password: self.settings.mqtt_password,
            clean_session: MQTT_CLEAN_SESSION,
            keep_alive_secs: MQTT_KEEPALIVE_SECS,
            last_will: LastWill {
                topic: LWT_TOPIC,
                message: LWT_MESSAGE,
                qos: QoS::AtMostOnce,
                retain: false,
            },
        }
    }

    pub fn start<T: MessagingTransport>(&mut self, client_id: ClientId, transport: &mut T) {
        if self.active {
            // New address, new client id: restart under it.
            self.stop(transport);
        }
        info!("mqtt: starting session as {}", client_id.as_str());
        let config = self.session_config(client_id);
        match transport.start(&config) {
            Ok(()) => self.active = true,
            Err(e) => error!("mqtt: session start failed {}", e),
        }
    }

    pub fn stop<T: MessagingTransport>(&mut self, transport: &mut T) {
        if !self.active {
            return;
        }
        info!("mqtt: stopping session");
        if let Err(e) = transport.stop() {
            error!("mqtt: session stop failed {}", e);
        }
        self.active = false;
    }

    pub fn on_event<M, T, F>(
        &mut self,
        event: &MqttEvent,
        connectivity: &Connectivity<M>,
        transport: &mut T,
        fota: &mut F,
    ) where
        M: RawMutex,
        T: MessagingTransport,
        F: FirmwareUpdate,
    {
        match event {
            MqttEvent::Connected => {
                info!("mqtt: connected");
                if !connectivity.set_session_up() {
                    return;
                }
                if let Err(e) = transport.subscribe(FOTA_TOPIC, QoS::AtMostOnce) {
                    error!("mqtt: subscribe to {} failed {}", FOTA_TOPIC, e);
                }
            }
            MqttEvent::Disconnected => {
                info!("mqtt: disconnected");
                connectivity.clear_session_up();
            }
            MqttEvent::Subscribed { msg_id } => info!("mqtt: subscribe ok, msg {}", msg_id),
            MqttEvent::Published { msg_id } => debug!("mqtt: published, msg {}", msg_id),
            MqttEvent::Data(chunk) => self.on_data(chunk, fota),
        }
    }

    /// Publish one telemetry record, QoS 0, no retain. Dropped while the
    /// session is down.
    pub fn publish<M, T>(&mut self, payload: &[u8], connectivity: &Connectivity<M>, transport: &mut T)
    where
        M: RawMutex,
        T: MessagingTransport,
    {
        if !connectivity.flags().session_up() {
            self.dropped = self.dropped.wrapping_add(1);
            debug!("mqtt: session down, telemetry dropped");
            return;
        }
        match transport.publish(TELEMETRY_TOPIC, payload, QoS::AtMostOnce, false) {
            Ok(()) => self.published = self.published.wrapping_add(1),
            Err(e) => {
                self.dropped = self.dropped.wrapping_add(1);
                warn!("mqtt: publish failed {}", e);
            }
        }
    }

    fn on_data<F: FirmwareUpdate>(&mut self, chunk: &InboundChunk, fota: &mut F) {
        // Later chunks of a split message carry no topic of their own.
        if chunk.offset != 0 {
            debug!("mqtt: chunk at {} of {} ignored", chunk.offset, chunk.total_len);
            return;
        }
        let msg = match ControlMessage::copy_from(&chunk.topic, &chunk.payload) {
            Ok(msg) => msg,
            Err(e) => {
                error!(
                    "mqtt: inbound message dropped {} (topic {} bytes, payload {} bytes)",
                    e,
                    chunk.topic.len(),
                    chunk.payload.len()
                );
                return;
            }
        };
        info!("mqtt: message on {=[u8]:a}", msg.topic());
        if msg.topic() == FOTA_TOPIC.as_bytes() {
            self.routed = self.routed.wrapping_add(1);
            fota.apply(msg.payload_c_str());
        }
    }
}

/// What ended one pass of the broker session loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionWake<M, R> {
    Inbound(M),
    Request(R),
    Idle,
}

/// One pass of the broker session loop.
///
/// `inbound` reads a message only if one has started arriving and resolves
/// to `None` otherwise. It always runs to completion: `request` and `idle`
/// are polled only after it has come back empty, so a queued request never
/// interrupts a packet half read off the socket.
pub async fn session_step<M, R>(
    inbound: impl Future<Output = Option<M>>,
    request: impl Future<Output = R>,
    idle: impl Future<Output = ()>,
) -> SessionWake<M, R> {
    if let Some(message) = inbound.await {
        return SessionWake::Inbound(message);
    }
    match select(request, idle).await {
        Either::First(request) => SessionWake::Request(request),
        Either::Second(()) => SessionWake::Idle,
    }
}
