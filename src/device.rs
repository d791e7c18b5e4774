//! Protocol coordinator.
//!
//! [Device] owns every protocol table (sessions, commissioning, subscriptions) and
//! runs the receive, decrypt, route, respond path for each datagram. The attribute
//! store is the only state shared with the sensor side.
//!
//! ```no_run
//! # use matd::{bridge, config::DeviceConfig, device, storage::FileStorage, transport::Transport};
//! # use std::sync::Arc;
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = DeviceConfig::default();
//! let storage = Arc::new(FileStorage::new(&config.storage_dir)?);
//! let device = device::Device::new(&config, storage, matd::attributes::AttributeStore::new())?;
//! let transport = Transport::new(config.bind_address, config.operational_port,
//!                                config.commissioning_port).await?;
//! let (readings, receiver) = bridge::channel();
//! let token = tokio_util::sync::CancellationToken::new();
//! device::run(device, transport, receiver, token).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;

use crate::attributes::{AttributePath, AttributeStore};
use crate::bridge::{self, SensorReading};
use crate::clusters::{self, network_commissioning::NetworkCommissioning, ClusterContext};
use crate::commissioning::{self, CommissioningContext, CommissioningState, PASE_SESSION_ID};
use crate::config::DeviceConfig;
use crate::interaction::{self, invoke, read, report, subscribe, write, StatusCode};
use crate::messages::{
    self, CounterValidator, MessageCounter, MessageHeader, ProtocolMessageHeader,
    StatusReportInfo,
};
use crate::session::SessionManager;
use crate::storage::Storage;
use crate::transport::{PortKind, Transport};

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Where replies and reports for a session go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Peer {
    kind: PortKind,
    addr: SocketAddr,
}

/// Datagram ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub kind: PortKind,
    pub peer: SocketAddr,
    pub data: Vec<u8>,
}

pub struct Device {
    store: Arc<AttributeStore>,
    sessions: SessionManager,
    commissioning: CommissioningContext,
    subscriptions: subscribe::SubscriptionManager,
    network: NetworkCommissioning,
    counters: CounterValidator,
    message_counter: MessageCounter,
    peers: HashMap<u16, Peer>,
    changes: mpsc::UnboundedReceiver<AttributePath>,
    change_subscriber: u32,
    setup_pin: String,
    discriminator: u16,
    started: Instant,
}

impl Device {
    /// Register cluster attributes, load fabrics and open the commissioning window
    /// when the device has no fabric yet.
    pub fn new(config: &DeviceConfig, storage: Arc<dyn Storage>, store: Arc<AttributeStore>) -> Result<Self> {
        let setup_pin = config.resolve_setup_pin()?;
        let discriminator = match config.discriminator {
            Some(d) if d > commissioning::MAX_DISCRIMINATOR => {
                anyhow::bail!("discriminator {} exceeds 12 bits", d)
            }
            Some(d) => d,
            None => commissioning::load_or_create_discriminator(storage.as_ref())?,
        };
        clusters::register_defaults(&store)?;

        let mut commissioning = CommissioningContext::new(storage.clone())?;
        commissioning.set_verify_confirmation(config.verify_pake3_confirmation);
        if let Err(e) = commissioning.load() {
            log::warn!("ignoring stored fabrics: {:#}", e);
        }

        let (sender, changes) = mpsc::unbounded_channel();
        let change_subscriber = store.subscribe(Arc::new(move |path, _value| {
            // receiver gone means device dropped
            let _ = sender.send(path);
        }))?;

        let mut device = Self {
            store,
            sessions: SessionManager::new(),
            commissioning,
            subscriptions: subscribe::SubscriptionManager::new(),
            network: NetworkCommissioning::with_storage(storage),
            counters: CounterValidator::new(),
            message_counter: MessageCounter::new(),
            peers: HashMap::new(),
            changes,
            change_subscriber,
            setup_pin,
            discriminator,
            started: Instant::now(),
        };
        if !device.commissioning.is_commissioned() {
            device.open_commissioning_window()?;
        }
        Ok(device)
    }

    pub fn open_commissioning_window(&mut self) -> Result<()> {
        self.commissioning.start(&self.setup_pin, self.discriminator)
    }

    pub fn store(&self) -> &Arc<AttributeStore> {
        &self.store
    }

    pub fn setup_pin(&self) -> &str {
        &self.setup_pin
    }

    pub fn discriminator(&self) -> u16 {
        self.discriminator
    }

    pub fn commissioning(&self) -> &CommissioningContext {
        &self.commissioning
    }

    pub fn commissioning_mut(&mut self) -> &mut CommissioningContext {
        &mut self.commissioning
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.count()
    }

    /// Seconds since device start, the clock used for subscription intervals.
    pub fn now(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Handle one received datagram and return the reply, if any.
    /// Invalid or unauthenticated input is dropped.
    pub fn process_datagram(&mut self, kind: PortKind, data: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        let now = self.now();
        self.process_datagram_at(kind, data, peer, now)
    }

    pub fn process_datagram_at(
        &mut self,
        kind: PortKind,
        data: &[u8],
        peer: SocketAddr,
        now: u64,
    ) -> Option<Vec<u8>> {
        match self.handle_datagram(kind, data, peer, now) {
            Ok(response) => response,
            Err(e) => {
                log::debug!("dropping message from {}: {:#}", peer, e);
                None
            }
        }
    }

    fn handle_datagram(
        &mut self,
        kind: PortKind,
        data: &[u8],
        peer: SocketAddr,
        now: u64,
    ) -> Result<Option<Vec<u8>>> {
        let (header, payload) = MessageHeader::decode(data)?;
        let plain;
        let payload = if header.session_id != 0 {
            let aad = &data[..data.len() - payload.len()];
            plain = self.sessions.decrypt_with_aad(header.session_id, aad, payload)?;
            if !self.counters.validate(header.session_id, header.message_counter) {
                anyhow::bail!(
                    "replayed counter {} on session {}",
                    header.message_counter,
                    header.session_id
                );
            }
            self.peers.insert(header.session_id, Peer { kind, addr: peer });
            plain.as_slice()
        } else {
            payload
        };
        let (exchange, body) = ProtocolMessageHeader::decode(payload)?;
        log::trace!(
            "message session {} counter {} protocol {} opcode 0x{:x} exchange {}",
            header.session_id,
            header.message_counter,
            exchange.protocol_id,
            exchange.opcode,
            exchange.exchange_id
        );

        let response = match exchange.protocol_id {
            ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL => {
                self.handle_secure_channel(&header, &exchange, body, kind, peer)?
            }
            ProtocolMessageHeader::PROTOCOL_ID_INTERACTION => {
                if header.session_id == 0 {
                    anyhow::bail!("interaction opcode 0x{:x} on unsecured session", exchange.opcode);
                }
                match self.handle_interaction(header.session_id, &exchange, body, now) {
                    Ok(response) => response,
                    Err(e) => {
                        let status = interaction::error_status(&e).ok_or(e)?;
                        log::debug!("interaction opcode 0x{:x} answered with {}", exchange.opcode, status);
                        Some((
                            ProtocolMessageHeader::INTERACTION_OPCODE_STATUS_RESP,
                            interaction::encode_status_response(status)?,
                        ))
                    }
                }
            }
            other => anyhow::bail!("unsupported protocol {}", other),
        };
        match response {
            Some((opcode, payload)) => Ok(Some(self.encode_response(&header, &exchange, opcode, &payload)?)),
            None => Ok(None),
        }
    }

    fn handle_secure_channel(
        &mut self,
        header: &MessageHeader,
        exchange: &ProtocolMessageHeader,
        body: &[u8],
        kind: PortKind,
        peer: SocketAddr,
    ) -> Result<Option<(u8, Vec<u8>)>> {
        match exchange.opcode {
            ProtocolMessageHeader::OPCODE_PBKDF_REQ
            | ProtocolMessageHeader::OPCODE_PASE_PAKE1
            | ProtocolMessageHeader::OPCODE_PASE_PAKE3 => {
                if header.session_id != 0 {
                    anyhow::bail!("pase message on secured session {}", header.session_id);
                }
                self.handle_pase(exchange.opcode, body, kind, peer).map(Some)
            }
            ProtocolMessageHeader::OPCODE_STATUS => {
                let status = StatusReportInfo::parse(body)?;
                log::debug!("status report from {}: {}", peer, status);
                Ok(None)
            }
            other => {
                log::debug!("ignoring secure channel opcode 0x{:x}", other);
                Ok(None)
            }
        }
    }

    fn handle_pase(&mut self, opcode: u8, body: &[u8], kind: PortKind, peer: SocketAddr) -> Result<(u8, Vec<u8>)> {
        // a fresh PBKDF request supersedes an abandoned handshake
        if opcode == ProtocolMessageHeader::OPCODE_PBKDF_REQ
            && self.commissioning.state() == CommissioningState::PaseStarted
            && self.commissioning.pase_state() != crate::pase::PaseState::Initialized
        {
            log::info!("restarting pase exchange for {}", peer);
            self.open_commissioning_window()?;
        }
        let res = self.commissioning.handle_pase_message(opcode, body, &mut self.sessions);
        match &res {
            Ok(_) if opcode == ProtocolMessageHeader::OPCODE_PASE_PAKE3 => {
                self.counters.forget(PASE_SESSION_ID);
                self.subscriptions.remove_all_for_session(PASE_SESSION_ID);
                self.peers.insert(PASE_SESSION_ID, Peer { kind, addr: peer });
            }
            Err(_) if self.commissioning.state() == CommissioningState::Error => {
                log::warn!("pase failed, reopening commissioning window");
                self.open_commissioning_window()?;
            }
            _ => {}
        }
        res
    }

    fn handle_interaction(
        &mut self,
        session_id: u16,
        exchange: &ProtocolMessageHeader,
        body: &[u8],
        now: u64,
    ) -> Result<Option<(u8, Vec<u8>)>> {
        let response = match exchange.opcode {
            ProtocolMessageHeader::INTERACTION_OPCODE_READ_REQ => {
                let ctx = ClusterContext {
                    store: &self.store,
                    network: &self.network,
                };
                (
                    ProtocolMessageHeader::INTERACTION_OPCODE_REPORT_DATA,
                    read::handle_read_request(&ctx, body)?,
                )
            }
            ProtocolMessageHeader::INTERACTION_OPCODE_SUBSCRIBE_REQ => (
                ProtocolMessageHeader::INTERACTION_OPCODE_SUBSCRIBE_RESP,
                subscribe::handle_subscribe_request(&mut self.subscriptions, session_id, body, now)?,
            ),
            ProtocolMessageHeader::INTERACTION_OPCODE_WRITE_REQ => (
                ProtocolMessageHeader::INTERACTION_OPCODE_WRITE_RESP,
                write::handle_write_request(body)?,
            ),
            ProtocolMessageHeader::INTERACTION_OPCODE_INVOKE_REQ => (
                ProtocolMessageHeader::INTERACTION_OPCODE_INVOKE_RESP,
                invoke::handle_invoke_request(&mut self.network, body)?,
            ),
            // acknowledgement of a report, nothing to answer
            ProtocolMessageHeader::INTERACTION_OPCODE_STATUS_RESP => return Ok(None),
            other => {
                log::debug!("unsupported interaction opcode 0x{:x}", other);
                (
                    ProtocolMessageHeader::INTERACTION_OPCODE_STATUS_RESP,
                    interaction::encode_status_response(StatusCode::InvalidAction)?,
                )
            }
        };
        Ok(Some(response))
    }

    fn encode_message(
        &mut self,
        session_id: u16,
        destination_node_id: Option<u64>,
        exchange: &ProtocolMessageHeader,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let header = MessageHeader {
            session_id,
            message_counter: self.message_counter.next_counter(),
            destination_node_id,
            ..Default::default()
        };
        let mut body = messages::encode_exchange(exchange, payload)?;
        if session_id != 0 {
            body = self.sessions.encrypt_with_aad(session_id, &header.encode()?, &body)?;
        }
        header.encode_with_payload(&body)
    }

    fn encode_response(
        &mut self,
        request: &MessageHeader,
        request_exchange: &ProtocolMessageHeader,
        opcode: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let exchange = ProtocolMessageHeader::new(
            request_exchange.protocol_id,
            opcode,
            request_exchange.exchange_id,
        );
        self.encode_message(request.session_id, request.source_node_id, &exchange, payload)
    }

    fn drop_session_state(&mut self, session_id: u16) {
        let removed = self.subscriptions.remove_all_for_session(session_id);
        if removed > 0 {
            log::debug!("removed {} subscriptions of session {}", removed, session_id);
        }
        self.counters.forget(session_id);
        self.peers.remove(&session_id);
        // PASE alone adds no fabric, without the session the device is unreachable again
        if session_id == PASE_SESSION_ID && !self.commissioning.is_commissioned() {
            log::info!("pase session closed without fabric, reopening commissioning window");
            if let Err(e) = self.open_commissioning_window() {
                log::warn!("can't reopen commissioning window: {:#}", e);
            }
        }
    }

    /// Destroy session and everything bound to it.
    pub fn close_session(&mut self, session_id: u16) {
        self.sessions.destroy(session_id);
        self.drop_session_state(session_id);
    }

    /// Periodic work: expire sessions, fire subscriptions due by interval or by
    /// attribute change, and return the encoded reports.
    pub fn poll(&mut self, now: u64) -> Vec<Outbound> {
        for session_id in self.sessions.cleanup_expired() {
            self.drop_session_state(session_id);
        }

        let mut fired = self.subscriptions.check_intervals(now);
        let mut changed = Vec::new();
        while let Ok(path) = self.changes.try_recv() {
            if !changed.contains(&path) {
                changed.push(path);
            }
        }
        for path in changed.iter() {
            fired.extend(self.subscriptions.notify_change(path, now));
        }
        if fired.is_empty() {
            return Vec::new();
        }

        let ctx = ClusterContext {
            store: &self.store,
            network: &self.network,
        };
        let reports = report::generate_reports(&ctx, &fired);
        let mut out = Vec::with_capacity(reports.len());
        for r in reports {
            let Some(peer) = self.peers.get(&r.session_id).copied() else {
                log::debug!("no peer for session {}, report dropped", r.session_id);
                continue;
            };
            let mut exchange = ProtocolMessageHeader::new(
                ProtocolMessageHeader::PROTOCOL_ID_INTERACTION,
                ProtocolMessageHeader::INTERACTION_OPCODE_REPORT_DATA,
                self.message_counter.next_exchange_id(),
            );
            exchange.exchange_flags |= ProtocolMessageHeader::FLAG_INITIATOR;
            match self.encode_message(r.session_id, None, &exchange, &r.payload) {
                Ok(data) => {
                    log::debug!(
                        "report for subscription {} to {}",
                        r.subscription_id,
                        peer.addr
                    );
                    out.push(Outbound {
                        kind: peer.kind,
                        peer: peer.addr,
                        data,
                    });
                }
                Err(e) => log::warn!("can't encode report {}: {:#}", r.subscription_id, e),
            }
        }
        out
    }

    /// One cooperative iteration: drain the transport, answer requests and send
    /// pending reports. Returns number of datagrams processed.
    pub async fn task(&mut self, transport: &mut Transport) -> usize {
        let mut processed = 0;
        let mut outgoing = Vec::new();
        while let Some(datagram) = transport.try_recv() {
            processed += 1;
            if let Some(data) = self.process_datagram(datagram.kind, &datagram.data, datagram.peer) {
                outgoing.push(Outbound {
                    kind: datagram.kind,
                    peer: datagram.peer,
                    data,
                });
            }
        }
        let now = self.now();
        outgoing.extend(self.poll(now));
        for o in outgoing {
            if let Err(e) = transport.send(o.kind, o.peer, &o.data).await {
                log::warn!("{:#}", e);
            }
        }
        processed
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.store.unsubscribe(self.change_subscriber);
    }
}

/// Consumer loop: apply sensor readings, run the protocol and flush attribute reports
/// until `token` is cancelled.
pub async fn run(
    mut device: Device,
    mut transport: Transport,
    mut readings: mpsc::Receiver<SensorReading>,
    token: tokio_util::sync::CancellationToken,
) -> Result<()> {
    log::info!(
        "device running, commissioning state {:?}, discriminator {}",
        device.commissioning.state(),
        device.discriminator
    );
    while !token.is_cancelled() {
        let applied = bridge::drain_readings(&mut readings, &device.store);
        let processed = device.task(&mut transport).await;
        device.store.process_reports();
        if applied == 0 && processed == 0 {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_SLEEP) => {}
                _ = token.cancelled() => break
            }
        }
    }
    log::info!("device stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeValue;
    use crate::clusters::on_off;
    use crate::controller::Commissioner;
    use crate::storage::MemoryStorage;
    use crate::tlv;

    fn device() -> Device {
        let config = DeviceConfig::default();
        Device::new(&config, Arc::new(MemoryStorage::new()), AttributeStore::new()).unwrap()
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn exchange(device: &mut Device, request: Vec<u8>, now: u64) -> Vec<u8> {
        device
            .process_datagram_at(PortKind::Commissioning, &request, peer(), now)
            .unwrap()
    }

    fn commission(device: &mut Device) -> Commissioner {
        let mut c = Commissioner::new(b"20202021").unwrap();
        let req = c.pbkdf_request().unwrap();
        let resp = exchange(device, req, 0);
        let req = c.pake1(&resp).unwrap();
        let resp = exchange(device, req, 0);
        let req = c.pake3(&resp).unwrap();
        let resp = exchange(device, req, 0);
        c.finish(&resp).unwrap();
        c
    }

    #[test]
    fn pase_then_encrypted_read() {
        let mut d = device();
        assert_eq!(d.commissioning().state(), CommissioningState::PaseStarted);
        let mut c = commission(&mut d);
        assert_eq!(d.commissioning().state(), CommissioningState::Commissioned);
        assert!(d.sessions().is_active(PASE_SESSION_ID));

        d.store()
            .update(on_off::path(), AttributeValue::Bool(true))
            .unwrap();
        let req = c.read_request(&[on_off::path()]).unwrap();
        let resp = exchange(&mut d, req.clone(), 0);
        let (opcode, report) = c.decode_secured(&resp).unwrap();
        assert_eq!(opcode, ProtocolMessageHeader::INTERACTION_OPCODE_REPORT_DATA);
        let t = tlv::decode_tlv(&report).unwrap();
        let r = &t.get_item(&[1]).unwrap().children()[0];
        assert_eq!(r.get_bool(&[1, 2]), Some(true));

        // same datagram again is a replay
        assert!(d
            .process_datagram_at(PortKind::Operational, &req, peer(), 0)
            .is_none());
    }

    #[test]
    fn rewritten_header_counter_rejected() {
        let mut d = device();
        let mut c = commission(&mut d);
        let req = c.read_request(&[on_off::path()]).unwrap();
        exchange(&mut d, req.clone(), 0);

        let mut forged = req.clone();
        forged[4..8].copy_from_slice(&0x7fff0000u32.to_le_bytes());
        assert!(d
            .process_datagram_at(PortKind::Operational, &forged, peer(), 0)
            .is_none());

        // session still usable with genuine traffic
        let req = c.read_request(&[on_off::path()]).unwrap();
        let resp = exchange(&mut d, req, 0);
        assert!(c.decode_secured(&resp).is_ok());
    }

    #[test]
    fn interaction_requires_session() {
        let mut d = device();
        let mut c = Commissioner::new(b"20202021").unwrap();
        let req = c.unsecured_read_request(&[on_off::path()]).unwrap();
        assert!(d
            .process_datagram_at(PortKind::Operational, &req, peer(), 0)
            .is_none());
        assert!(d
            .process_datagram_at(PortKind::Operational, &[0xff; 4], peer(), 0)
            .is_none());
    }

    #[test]
    fn wrong_pin_reopens_window() {
        let mut d = device();
        d.commissioning_mut().set_verify_confirmation(true);
        let mut c = Commissioner::new(b"11111111").unwrap();
        let req = c.pbkdf_request().unwrap();
        let resp = exchange(&mut d, req, 0);
        let req = c.pake1(&resp).unwrap();
        let resp = exchange(&mut d, req, 0);
        let req = c.pake3(&resp).unwrap();
        assert!(d
            .process_datagram_at(PortKind::Commissioning, &req, peer(), 0)
            .is_none());
        assert_eq!(d.commissioning().state(), CommissioningState::PaseStarted);
        assert_eq!(d.sessions().active_count(), 0);

        // the right pin still works afterwards
        commission(&mut d);
        assert!(d.sessions().is_active(PASE_SESSION_ID));
    }

    #[test]
    fn subscription_reports() {
        let mut d = device();
        let mut c = commission(&mut d);
        let req = c.subscribe_request(&[on_off::path()], 0, 10).unwrap();
        let resp = exchange(&mut d, req, 100);
        let (opcode, body) = c.decode_secured(&resp).unwrap();
        assert_eq!(opcode, ProtocolMessageHeader::INTERACTION_OPCODE_SUBSCRIBE_RESP);
        let subscription_id = tlv::decode_tlv(&body).unwrap().get_u32(&[0]).unwrap();
        assert_eq!(d.subscription_count(), 1);

        assert!(d.poll(105).is_empty());
        d.store()
            .update(on_off::path(), AttributeValue::Bool(true))
            .unwrap();
        let out = d.poll(106);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].peer, peer());
        assert_eq!(out[0].kind, PortKind::Commissioning);
        let (opcode, body) = c.decode_secured(&out[0].data).unwrap();
        assert_eq!(opcode, ProtocolMessageHeader::INTERACTION_OPCODE_REPORT_DATA);
        let t = tlv::decode_tlv(&body).unwrap();
        assert_eq!(t.get_u32(&[0]), Some(subscription_id));

        // max interval elapsed
        assert!(d.poll(110).is_empty());
        assert_eq!(d.poll(116).len(), 1);
    }

    #[test]
    fn closed_pase_session_reopens_window() {
        let mut d = device();
        commission(&mut d);
        assert_eq!(d.commissioning().state(), CommissioningState::Commissioned);
        assert!(!d.commissioning().is_commissioned());

        d.close_session(PASE_SESSION_ID);
        assert!(!d.sessions().is_active(PASE_SESSION_ID));
        assert_eq!(d.commissioning().state(), CommissioningState::PaseStarted);
        commission(&mut d);
        assert!(d.sessions().is_active(PASE_SESSION_ID));

        // with a fabric the window stays closed
        d.commissioning_mut().complete(1, 0xfff1, &[4; 65]).unwrap();
        d.close_session(PASE_SESSION_ID);
        assert_eq!(d.commissioning().state(), CommissioningState::Commissioned);
    }

    #[test]
    fn inverted_intervals_answered_with_status() {
        let mut d = device();
        let mut c = commission(&mut d);
        let req = c.subscribe_request(&[on_off::path()], 30, 0).unwrap();
        let resp = exchange(&mut d, req, 100);
        let (opcode, body) = c.decode_secured(&resp).unwrap();
        assert_eq!(opcode, ProtocolMessageHeader::INTERACTION_OPCODE_STATUS_RESP);
        assert_eq!(
            tlv::decode_tlv(&body).unwrap().get_u8(&[0]),
            Some(StatusCode::InvalidAction as u8)
        );
        assert_eq!(d.subscription_count(), 0);

        let req = c.subscribe_request(&[on_off::path()], 0, 0).unwrap();
        exchange(&mut d, req, 100);
        for _ in 0..5 {
            assert!(d.poll(100).is_empty());
        }
        assert_eq!(d.poll(101).len(), 1);
    }

    #[test]
    fn full_response_budget_fits_datagram() {
        let mut d = device();
        commission(&mut d);
        let protocol = ProtocolMessageHeader::new(
            ProtocolMessageHeader::PROTOCOL_ID_INTERACTION,
            ProtocolMessageHeader::INTERACTION_OPCODE_REPORT_DATA,
            1,
        );
        let payload = vec![0u8; messages::MAX_APPLICATION_PAYLOAD_SIZE];
        let data = d
            .encode_message(PASE_SESSION_ID, Some(0x1122), &protocol, &payload)
            .unwrap();
        assert!(data.len() <= messages::MAX_MESSAGE_SIZE);
    }
}
