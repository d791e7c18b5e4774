//! Commissioner side of the protocol.
//!
//! [Commissioner] builds and parses datagrams without doing any IO, [Controller]
//! drives it over UDP. Both are used by the demo commissioner and the tests.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use byteorder::{BigEndian, WriteBytesExt};
use rand::RngCore;
use tokio::net::UdpSocket;
use zeroize::Zeroize;

use crate::attributes::AttributePath;
use crate::commissioning::PASE_SESSION_ID;
use crate::interaction::{encode_path, invoke};
use crate::messages::{
    self, MessageCounter, MessageHeader, ProtocolMessageHeader, StatusReportInfo,
    MAX_MESSAGE_SIZE,
};
use crate::spake2p::{Engine, Prover};
use crate::tlv::{self, Tag, TlvItem, TlvWriter};
use crate::util::cryptoutil;

pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

// marks nonces of commissioner-originated messages so both directions never share one
const NONCE_DIRECTION_INITIATOR: u8 = 1;

pub struct Commissioner {
    engine: Engine,
    passcode: Vec<u8>,
    prover: Option<Prover>,
    session_key: Option<Vec<u8>>,
    counter: MessageCounter,
    nonce_counter: u32,
}

impl Commissioner {
    pub fn new(passcode: &[u8]) -> Result<Self> {
        Ok(Self {
            engine: Engine::new()?,
            passcode: passcode.to_vec(),
            prover: None,
            session_key: None,
            counter: MessageCounter::new(),
            nonce_counter: 0,
        })
    }

    pub fn is_established(&self) -> bool {
        self.session_key.is_some()
    }

    fn unsecured(&mut self, protocol_id: u16, opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let mut exchange =
            ProtocolMessageHeader::new(protocol_id, opcode, self.counter.next_exchange_id());
        exchange.exchange_flags |= ProtocolMessageHeader::FLAG_INITIATOR;
        let header = MessageHeader {
            message_counter: self.counter.next_counter(),
            ..Default::default()
        };
        header.encode_with_payload(&messages::encode_exchange(&exchange, payload)?)
    }

    fn decode_unsecured(data: &[u8], expected_opcode: u8) -> Result<Vec<u8>> {
        let (header, payload) = MessageHeader::decode(data)?;
        if header.session_id != 0 {
            anyhow::bail!("expected unsecured message, got session {}", header.session_id);
        }
        let (exchange, body) = ProtocolMessageHeader::decode(payload)?;
        if exchange.protocol_id != ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL
            || exchange.opcode != expected_opcode
        {
            anyhow::bail!(
                "expected opcode 0x{:x}, got protocol {} opcode 0x{:x}",
                expected_opcode,
                exchange.protocol_id,
                exchange.opcode
            );
        }
        Ok(body.to_vec())
    }

    /// PBKDFParamRequest {1: random, 2: initiator session, 3: passcode id, 4: has params}
    pub fn pbkdf_request(&mut self) -> Result<Vec<u8>> {
        let mut random = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut random);
        let mut tlv = TlvWriter::new();
        tlv.start_struct(Tag::Anonymous)?;
        tlv.write_bytes(1, &random)?;
        tlv.write_uint(2, PASE_SESSION_ID as u64)?;
        tlv.write_uint(3, 0)?;
        tlv.write_bool(4, false)?;
        tlv.end_container()?;
        log::debug!("send pbkdf request");
        self.unsecured(
            ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL,
            ProtocolMessageHeader::OPCODE_PBKDF_REQ,
            tlv.as_slice(),
        )
    }

    /// Consume PBKDF response, return PAKE1 carrying pA.
    pub fn pake1(&mut self, pbkdf_response: &[u8]) -> Result<Vec<u8>> {
        let body = Self::decode_unsecured(pbkdf_response, ProtocolMessageHeader::OPCODE_PBKDF_RESP)?;
        let params = tlv::decode_tlv(&body)?;
        let iterations = params
            .get_u32(&[1])
            .context("pbkdf_response - iterations missing")?;
        let salt = params
            .get_octet_string(&[2])
            .context("pbkdf_response - salt missing")?;
        let prover = Prover::start(&self.engine, &self.passcode, salt, iterations);
        let pa = prover.pa.as_bytes().to_vec();
        self.prover = Some(prover);
        log::debug!("send pake1");
        self.unsecured(
            ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL,
            ProtocolMessageHeader::OPCODE_PASE_PAKE1,
            &pa,
        )
    }

    /// Consume PAKE2 (pB), return PAKE3 carrying cA.
    pub fn pake3(&mut self, pake2: &[u8]) -> Result<Vec<u8>> {
        let pb = Self::decode_unsecured(pake2, ProtocolMessageHeader::OPCODE_PASE_PAKE2)?;
        let prover = self.prover.as_mut().context("pake1 not sent")?;
        let ca = prover.finish(&self.engine, &pb)?;
        log::debug!("send pake3");
        self.unsecured(
            ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL,
            ProtocolMessageHeader::OPCODE_PASE_PAKE3,
            &ca,
        )
    }

    /// Consume status report ending the handshake and install session key.
    pub fn finish(&mut self, status_report: &[u8]) -> Result<()> {
        let body = Self::decode_unsecured(status_report, ProtocolMessageHeader::OPCODE_STATUS)?;
        let status = StatusReportInfo::parse(&body)?;
        if !status.is_ok() {
            anyhow::bail!("pake3 resp not ok: {}", status);
        }
        let prover = self.prover.take().context("pake3 not sent")?;
        self.session_key = Some(prover.session_key(PASE_SESSION_ID)?);
        self.nonce_counter = 0;
        log::debug!("pase ok; session: {}", PASE_SESSION_ID);
        Ok(())
    }

    fn nonce(&self) -> Result<Vec<u8>> {
        let mut nonce = Vec::with_capacity(cryptoutil::CCM_NONCE_SIZE);
        nonce.write_u16::<BigEndian>(PASE_SESSION_ID)?;
        nonce.write_u32::<BigEndian>(self.nonce_counter)?;
        nonce.write_u8(NONCE_DIRECTION_INITIATOR)?;
        nonce.resize(cryptoutil::CCM_NONCE_SIZE, 0);
        Ok(nonce)
    }

    fn secured(&mut self, opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let key = self.session_key.as_ref().context("no session established")?;
        let mut exchange = ProtocolMessageHeader::new(
            ProtocolMessageHeader::PROTOCOL_ID_INTERACTION,
            opcode,
            self.counter.next_exchange_id(),
        );
        exchange.exchange_flags |= ProtocolMessageHeader::FLAG_INITIATOR;
        let plain = messages::encode_exchange(&exchange, payload)?;
        let header = MessageHeader {
            session_id: PASE_SESSION_ID,
            message_counter: self.counter.next_counter(),
            ..Default::default()
        };
        let mut body = self.nonce()?;
        body.extend_from_slice(&cryptoutil::aes128_ccm_encrypt(
            key,
            &body,
            &header.encode()?,
            &plain,
        )?);
        self.nonce_counter = self.nonce_counter.wrapping_add(1);
        header.encode_with_payload(&body)
    }

    /// Decrypt message from device. Returns opcode and application payload.
    pub fn decode_secured(&self, data: &[u8]) -> Result<(u8, Vec<u8>)> {
        let key = self.session_key.as_ref().context("no session established")?;
        let (header, payload) = MessageHeader::decode(data)?;
        if header.session_id != PASE_SESSION_ID {
            anyhow::bail!("unexpected session {}", header.session_id);
        }
        if payload.len() < cryptoutil::CCM_NONCE_SIZE + cryptoutil::CCM_TAG_SIZE {
            anyhow::bail!("secured payload too short");
        }
        let aad = &data[..data.len() - payload.len()];
        let (nonce, ct) = payload.split_at(cryptoutil::CCM_NONCE_SIZE);
        let plain = cryptoutil::aes128_ccm_decrypt(key, nonce, aad, ct)?;
        let (exchange, body) = ProtocolMessageHeader::decode(&plain)?;
        if exchange.protocol_id != ProtocolMessageHeader::PROTOCOL_ID_INTERACTION {
            anyhow::bail!("unexpected protocol {}", exchange.protocol_id);
        }
        Ok((exchange.opcode, body.to_vec()))
    }

    fn encode_read_request(paths: &[AttributePath]) -> Result<Vec<u8>> {
        let mut tlv = TlvWriter::new();
        tlv.start_struct(Tag::Anonymous)?;
        tlv.start_array(0)?;
        for p in paths {
            encode_path(&mut tlv, Tag::Anonymous, &(*p).into())?;
        }
        tlv.end_container()?;
        tlv.write_bool(3, false)?;
        tlv.end_container()?;
        Ok(tlv.into_vec())
    }

    pub fn read_request(&mut self, paths: &[AttributePath]) -> Result<Vec<u8>> {
        let payload = Self::encode_read_request(paths)?;
        self.secured(ProtocolMessageHeader::INTERACTION_OPCODE_READ_REQ, &payload)
    }

    /// Read request sent without session, devices must drop it.
    pub fn unsecured_read_request(&mut self, paths: &[AttributePath]) -> Result<Vec<u8>> {
        let payload = Self::encode_read_request(paths)?;
        self.unsecured(
            ProtocolMessageHeader::PROTOCOL_ID_INTERACTION,
            ProtocolMessageHeader::INTERACTION_OPCODE_READ_REQ,
            &payload,
        )
    }

    pub fn subscribe_request(
        &mut self,
        paths: &[AttributePath],
        min_interval: u16,
        max_interval: u16,
    ) -> Result<Vec<u8>> {
        let mut tlv = TlvWriter::new();
        tlv.start_struct(Tag::Anonymous)?;
        tlv.write_bool(0, false)?;
        tlv.write_uint(1, min_interval as u64)?;
        tlv.write_uint(2, max_interval as u64)?;
        tlv.start_array(3)?;
        for p in paths {
            encode_path(&mut tlv, Tag::Anonymous, &(*p).into())?;
        }
        tlv.end_container()?;
        tlv.end_container()?;
        self.secured(
            ProtocolMessageHeader::INTERACTION_OPCODE_SUBSCRIBE_REQ,
            tlv.as_slice(),
        )
    }

    pub fn invoke_request(
        &mut self,
        endpoint: u16,
        cluster: u32,
        command: u32,
        fields: &[(u8, &[u8])],
    ) -> Result<Vec<u8>> {
        let payload = invoke::encode_invoke_request(endpoint, cluster, command, fields)?;
        self.secured(ProtocolMessageHeader::INTERACTION_OPCODE_INVOKE_REQ, &payload)
    }
}

impl Drop for Commissioner {
    fn drop(&mut self) {
        self.passcode.zeroize();
        if let Some(key) = self.session_key.as_mut() {
            key.zeroize();
        }
    }
}

/// [Commissioner] bound to a UDP socket talking to one device.
pub struct Controller {
    socket: UdpSocket,
    commissioning: SocketAddr,
    operational: SocketAddr,
    commissioner: Commissioner,
}

impl Controller {
    pub async fn new(
        local: &str,
        commissioning: SocketAddr,
        operational: SocketAddr,
        passcode: &[u8],
    ) -> Result<Self> {
        let socket = UdpSocket::bind(local)
            .await
            .context(format!("can't bind {}", local))?;
        Ok(Self {
            socket,
            commissioning,
            operational,
            commissioner: Commissioner::new(passcode)?,
        })
    }

    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let (n, _) = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf))
            .await
            .context("timeout waiting for device")??;
        buf.truncate(n);
        Ok(buf)
    }

    async fn request(&self, to: SocketAddr, data: &[u8]) -> Result<Vec<u8>> {
        self.socket.send_to(data, to).await?;
        self.recv(RESPONSE_TIMEOUT).await
    }

    /// Run PASE against the commissioning port.
    pub async fn commission(&mut self) -> Result<()> {
        let req = self.commissioner.pbkdf_request()?;
        let resp = self.request(self.commissioning, &req).await?;
        let req = self.commissioner.pake1(&resp)?;
        let resp = self.request(self.commissioning, &req).await?;
        let req = self.commissioner.pake3(&resp)?;
        let resp = self.request(self.commissioning, &req).await?;
        self.commissioner.finish(&resp)
    }

    async fn interact(&mut self, request: Vec<u8>, expected_opcode: u8) -> Result<TlvItem> {
        let resp = self.request(self.operational, &request).await?;
        let (opcode, body) = self.commissioner.decode_secured(&resp)?;
        if opcode != expected_opcode {
            anyhow::bail!("expected opcode 0x{:x}, got 0x{:x}", expected_opcode, opcode);
        }
        Ok(tlv::decode_tlv(&body)?)
    }

    /// Read attributes, returns ReportData.
    pub async fn read(&mut self, paths: &[AttributePath]) -> Result<TlvItem> {
        let req = self.commissioner.read_request(paths)?;
        self.interact(req, ProtocolMessageHeader::INTERACTION_OPCODE_REPORT_DATA)
            .await
    }

    /// Subscribe, returns subscription id.
    pub async fn subscribe(
        &mut self,
        paths: &[AttributePath],
        min_interval: u16,
        max_interval: u16,
    ) -> Result<u32> {
        let req = self
            .commissioner
            .subscribe_request(paths, min_interval, max_interval)?;
        let resp = self
            .interact(req, ProtocolMessageHeader::INTERACTION_OPCODE_SUBSCRIBE_RESP)
            .await?;
        resp.get_u32(&[0]).context("subscription id missing")
    }

    pub async fn invoke(
        &mut self,
        endpoint: u16,
        cluster: u32,
        command: u32,
        fields: &[(u8, &[u8])],
    ) -> Result<TlvItem> {
        let req = self
            .commissioner
            .invoke_request(endpoint, cluster, command, fields)?;
        self.interact(req, ProtocolMessageHeader::INTERACTION_OPCODE_INVOKE_RESP)
            .await
    }

    /// Wait for next subscription report.
    pub async fn recv_report(&self, timeout: Duration) -> Result<TlvItem> {
        let data = self.recv(timeout).await?;
        let (opcode, body) = self.commissioner.decode_secured(&data)?;
        if opcode != ProtocolMessageHeader::INTERACTION_OPCODE_REPORT_DATA {
            anyhow::bail!("expected report, got opcode 0x{:x}", opcode);
        }
        Ok(tlv::decode_tlv(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_session() {
        let mut c = Commissioner::new(b"20202021").unwrap();
        assert!(!c.is_established());
        assert!(c.read_request(&[AttributePath::new(1, 6, 0)]).is_err());
        assert!(c.pake3(&[0; 16]).is_err());

        let req = c.pbkdf_request().unwrap();
        let (header, payload) = MessageHeader::decode(&req).unwrap();
        assert_eq!(header.session_id, 0);
        let (exchange, body) = ProtocolMessageHeader::decode(payload).unwrap();
        assert!(exchange.is_initiator());
        assert_eq!(exchange.opcode, ProtocolMessageHeader::OPCODE_PBKDF_REQ);
        let t = tlv::decode_tlv(body).unwrap();
        assert_eq!(t.get_octet_string(&[1]).map(|r| r.len()), Some(32));
    }

    #[test]
    fn nonce_marks_direction() {
        let c = Commissioner::new(b"20202021").unwrap();
        let nonce = c.nonce().unwrap();
        assert_eq!(nonce.len(), cryptoutil::CCM_NONCE_SIZE);
        assert_eq!(&nonce[..2], &[0, 1]);
        assert_eq!(nonce[6], NONCE_DIRECTION_INITIATOR);
    }
}
