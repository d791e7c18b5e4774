use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use crate::util::cryptoutil;

pub const MIN_HEADER_SIZE: usize = 8;
pub const MAX_HEADER_SIZE: usize = 24;
/// Maximum datagram (IPv6 minimum MTU).
pub const MAX_MESSAGE_SIZE: usize = 1280;
pub const MAX_PAYLOAD_SIZE: usize = MAX_MESSAGE_SIZE - MAX_HEADER_SIZE;
/// Exchange flags, opcode, exchange id and protocol id, without ack counter.
pub const PROTOCOL_HEADER_SIZE: usize = 6;
/// Room for an interaction payload once framing, protocol header, nonce and tag are added.
pub const MAX_APPLICATION_PAYLOAD_SIZE: usize = MAX_PAYLOAD_SIZE
    - PROTOCOL_HEADER_SIZE
    - cryptoutil::CCM_NONCE_SIZE
    - cryptoutil::CCM_TAG_SIZE;

pub const MESSAGE_VERSION: u8 = 0;

/// Framing errors. Returned inside [anyhow::Error], use `downcast_ref` to branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    InvalidInput,
    InvalidVersion(u8),
    Truncated,
    UnsupportedDestinationSize(u8),
    TooLarge(usize),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::InvalidInput => write!(f, "message shorter than minimal header"),
            MessageError::InvalidVersion(v) => write!(f, "unsupported message version {}", v),
            MessageError::Truncated => write!(f, "message header truncated"),
            MessageError::UnsupportedDestinationSize(d) => {
                write!(f, "unsupported destination size field {}", d)
            }
            MessageError::TooLarge(s) => {
                write!(f, "message size {} exceeds {}", s, MAX_MESSAGE_SIZE)
            }
        }
    }
}

impl std::error::Error for MessageError {}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub session_id: u16,
    pub security_flags: u8,
    pub message_counter: u32,
    pub source_node_id: Option<u64>,
    pub destination_node_id: Option<u64>,
}

impl MessageHeader {
    const VERSION_SHIFT: u8 = 4;
    const FLAG_SRC_PRESENT: u8 = 4;
    const DSIZ_MASK: u8 = 3;
    const DSIZ_64: u8 = 1;

    pub fn flags(&self) -> u8 {
        let mut flags = MESSAGE_VERSION << Self::VERSION_SHIFT;
        if self.source_node_id.is_some() {
            flags |= Self::FLAG_SRC_PRESENT;
        }
        if self.destination_node_id.is_some() {
            flags |= Self::DSIZ_64;
        }
        flags
    }

    pub fn encoded_len(&self) -> usize {
        MIN_HEADER_SIZE
            + self.source_node_id.map_or(0, |_| 8)
            + self.destination_node_id.map_or(0, |_| 8)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(MAX_HEADER_SIZE);
        out.write_u8(self.flags())?;
        out.write_u16::<LittleEndian>(self.session_id)?;
        out.write_u8(self.security_flags)?;
        out.write_u32::<LittleEndian>(self.message_counter)?;
        if let Some(sn) = self.source_node_id {
            out.write_u64::<LittleEndian>(sn)?;
        }
        if let Some(dn) = self.destination_node_id {
            out.write_u64::<LittleEndian>(dn)?;
        }
        Ok(out)
    }

    /// Header followed by payload, bounded by [MAX_MESSAGE_SIZE].
    pub fn encode_with_payload(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let total = self.encoded_len() + payload.len();
        if total > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge(total).into());
        }
        let mut out = self.encode()?;
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// Decode header, returns it together with remaining payload bytes.
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8])> {
        if data.len() < MIN_HEADER_SIZE {
            return Err(MessageError::InvalidInput.into());
        }
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge(data.len()).into());
        }
        let mut cursor = std::io::Cursor::new(data);
        let flags = cursor.read_u8()?;
        let version = flags >> Self::VERSION_SHIFT;
        if version != MESSAGE_VERSION {
            return Err(MessageError::InvalidVersion(version).into());
        }
        let session_id = cursor.read_u16::<LittleEndian>()?;
        let security_flags = cursor.read_u8()?;
        let message_counter = cursor.read_u32::<LittleEndian>()?;
        let source_node_id = if (flags & Self::FLAG_SRC_PRESENT) != 0 {
            Some(
                cursor
                    .read_u64::<LittleEndian>()
                    .map_err(|_| MessageError::Truncated)?,
            )
        } else {
            None
        };
        let destination_node_id = match flags & Self::DSIZ_MASK {
            0 => None,
            Self::DSIZ_64 => Some(
                cursor
                    .read_u64::<LittleEndian>()
                    .map_err(|_| MessageError::Truncated)?,
            ),
            other => return Err(MessageError::UnsupportedDestinationSize(other).into()),
        };
        let pos = cursor.position() as usize;
        Ok((
            Self {
                session_id,
                security_flags,
                message_counter,
                source_node_id,
                destination_node_id,
            },
            &data[pos..],
        ))
    }
}

/// Exchange layer header carried at the start of the (decrypted) payload.
/// Protocol id, opcode and exchange id travel here rather than in [MessageHeader].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessageHeader {
    pub exchange_flags: u8,
    pub opcode: u8,
    pub exchange_id: u16,
    pub protocol_id: u16,
    pub ack_counter: u32,
}

impl ProtocolMessageHeader {
    pub const FLAG_INITIATOR: u8 = 1;
    pub const FLAG_ACK: u8 = 2;
    pub const FLAG_RELIABILITY: u8 = 4;

    pub const PROTOCOL_ID_SECURE_CHANNEL: u16 = 0;
    pub const PROTOCOL_ID_INTERACTION: u16 = 1;

    pub const OPCODE_MSG_COUNTER_SYNC_REQ: u8 = 0x00;
    pub const OPCODE_MSG_COUNTER_SYNC_RESP: u8 = 0x01;
    pub const OPCODE_ACK: u8 = 0x10;
    pub const OPCODE_PBKDF_REQ: u8 = 0x20;
    pub const OPCODE_PBKDF_RESP: u8 = 0x21;
    pub const OPCODE_PASE_PAKE1: u8 = 0x22;
    pub const OPCODE_PASE_PAKE2: u8 = 0x23;
    pub const OPCODE_PASE_PAKE3: u8 = 0x24;
    pub const OPCODE_STATUS: u8 = 0x40;

    pub const INTERACTION_OPCODE_STATUS_RESP: u8 = 0x01;
    pub const INTERACTION_OPCODE_READ_REQ: u8 = 0x02;
    pub const INTERACTION_OPCODE_SUBSCRIBE_REQ: u8 = 0x03;
    pub const INTERACTION_OPCODE_SUBSCRIBE_RESP: u8 = 0x04;
    pub const INTERACTION_OPCODE_REPORT_DATA: u8 = 0x05;
    pub const INTERACTION_OPCODE_WRITE_REQ: u8 = 0x06;
    pub const INTERACTION_OPCODE_WRITE_RESP: u8 = 0x07;
    pub const INTERACTION_OPCODE_INVOKE_REQ: u8 = 0x08;
    pub const INTERACTION_OPCODE_INVOKE_RESP: u8 = 0x09;
    pub const INTERACTION_OPCODE_TIMED_REQ: u8 = 0x0a;

    pub fn new(protocol_id: u16, opcode: u8, exchange_id: u16) -> Self {
        Self {
            exchange_flags: 0,
            opcode,
            exchange_id,
            protocol_id,
            ack_counter: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(10);
        out.write_u8(self.exchange_flags)?;
        out.write_u8(self.opcode)?;
        out.write_u16::<LittleEndian>(self.exchange_id)?;
        out.write_u16::<LittleEndian>(self.protocol_id)?;
        if (self.exchange_flags & Self::FLAG_ACK) != 0 {
            out.write_u32::<LittleEndian>(self.ack_counter)?;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut cursor = std::io::Cursor::new(data);
        let exchange_flags = cursor.read_u8()?;
        let opcode = cursor.read_u8()?;
        let exchange_id = cursor.read_u16::<LittleEndian>()?;
        let protocol_id = cursor.read_u16::<LittleEndian>()?;
        let mut ack_counter = 0;
        if (exchange_flags & Self::FLAG_ACK) != 0 {
            ack_counter = cursor.read_u32::<LittleEndian>()?;
        }
        let pos = cursor.position() as usize;
        Ok((
            Self {
                exchange_flags,
                opcode,
                exchange_id,
                protocol_id,
                ack_counter,
            },
            &data[pos..],
        ))
    }

    pub fn is_initiator(&self) -> bool {
        (self.exchange_flags & Self::FLAG_INITIATOR) != 0
    }
}

/// Protocol header plus application payload.
pub fn encode_exchange(header: &ProtocolMessageHeader, payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = header.encode()?;
    out.extend_from_slice(payload);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureChannelGeneralCode {
    Success = 0,
    Failure = 1,
    BadPrecondition = 2,
    OutOfRange = 3,
    BadRequest = 4,
    Unsupported = 5,
    Unexpected = 6,
    ResourceExhausted = 7,
    Busy = 8,
    Timeout = 9,
    Unknown = 0xffff,
}

impl From<u16> for SecureChannelGeneralCode {
    fn from(value: u16) -> Self {
        match value {
            0 => SecureChannelGeneralCode::Success,
            1 => SecureChannelGeneralCode::Failure,
            2 => SecureChannelGeneralCode::BadPrecondition,
            3 => SecureChannelGeneralCode::OutOfRange,
            4 => SecureChannelGeneralCode::BadRequest,
            5 => SecureChannelGeneralCode::Unsupported,
            6 => SecureChannelGeneralCode::Unexpected,
            7 => SecureChannelGeneralCode::ResourceExhausted,
            8 => SecureChannelGeneralCode::Busy,
            9 => SecureChannelGeneralCode::Timeout,
            _ => SecureChannelGeneralCode::Unknown,
        }
    }
}

impl std::fmt::Display for SecureChannelGeneralCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SecureChannelGeneralCode::Success => "SUCCESS",
            SecureChannelGeneralCode::Failure => "FAILURE",
            SecureChannelGeneralCode::BadPrecondition => "BAD_PRECONDITION",
            SecureChannelGeneralCode::OutOfRange => "OUT_OF_RANGE",
            SecureChannelGeneralCode::BadRequest => "BAD_REQUEST",
            SecureChannelGeneralCode::Unsupported => "UNSUPPORTED",
            SecureChannelGeneralCode::Unexpected => "UNEXPECTED",
            SecureChannelGeneralCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            SecureChannelGeneralCode::Busy => "BUSY",
            SecureChannelGeneralCode::Timeout => "TIMEOUT",
            SecureChannelGeneralCode::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

pub const PROTOCOL_CODE_SESSION_ESTABLISHMENT_SUCCESS: u16 = 0;
pub const PROTOCOL_CODE_INVALID_PARAMETER: u16 = 2;

/// Secure channel StatusReport body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReportInfo {
    pub general_code: u16,
    pub protocol_id: u32,
    pub protocol_code: u16,
}

impl std::fmt::Display for StatusReportInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_ok() {
            return write!(f, "StatusReportInfo: OK");
        }
        write!(
            f,
            "StatusReportInfo: general_code={}, protocol_id={}, protocol_code={}",
            SecureChannelGeneralCode::from(self.general_code),
            self.protocol_id,
            self.protocol_code
        )
    }
}

impl StatusReportInfo {
    pub fn session_established() -> Self {
        Self {
            general_code: SecureChannelGeneralCode::Success as u16,
            protocol_id: ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL as u32,
            protocol_code: PROTOCOL_CODE_SESSION_ESTABLISHMENT_SUCCESS,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8);
        out.write_u16::<LittleEndian>(self.general_code)?;
        out.write_u32::<LittleEndian>(self.protocol_id)?;
        out.write_u16::<LittleEndian>(self.protocol_code)?;
        Ok(out)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let general_code = cursor.read_u16::<LittleEndian>()?;
        let protocol_id = cursor.read_u32::<LittleEndian>()?;
        let protocol_code = cursor.read_u16::<LittleEndian>()?;
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest)?;
        if !rest.is_empty() {
            log::trace!("status report carries {} extra bytes", rest.len());
        }
        Ok(Self {
            general_code,
            protocol_id,
            protocol_code,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.general_code == 0 && self.protocol_code == 0
    }
}

/// Outbound message counter and exchange id allocator of the message layer.
/// Independent from the per session counters kept by [crate::session::SessionManager].
pub struct MessageCounter {
    counter: AtomicU32,
    exchange: AtomicU16,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(rand::random::<u32>() >> 4),
            exchange: AtomicU16::new(rand::random()),
        }
    }

    pub fn next_counter(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_exchange_id(&self) -> u16 {
        self.exchange.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MessageCounter {
    fn default() -> Self {
        Self::new()
    }
}

pub const COUNTER_TRACKING_SLOTS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct CounterSlot {
    session_id: u16,
    last_counter: u32,
}

/// Inbound replay check: counters must strictly increase per session.
/// Unsecured messages (session 0) are always accepted, as are sessions that do not
/// fit into the tracking table.
pub struct CounterValidator {
    slots: [Option<CounterSlot>; COUNTER_TRACKING_SLOTS],
}

impl CounterValidator {
    pub fn new() -> Self {
        Self {
            slots: [None; COUNTER_TRACKING_SLOTS],
        }
    }

    pub fn validate(&mut self, session_id: u16, counter: u32) -> bool {
        if session_id == 0 {
            return true;
        }
        if let Some(slot) = self
            .slots
            .iter_mut()
            .flatten()
            .find(|s| s.session_id == session_id)
        {
            if counter > slot.last_counter {
                slot.last_counter = counter;
                return true;
            }
            log::debug!(
                "replayed counter {} for session {} (last {})",
                counter,
                session_id,
                slot.last_counter
            );
            return false;
        }
        if let Some(free) = self.slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(CounterSlot {
                session_id,
                last_counter: counter,
            });
        }
        true
    }

    pub fn forget(&mut self, session_id: u16) {
        for slot in self.slots.iter_mut() {
            if slot.is_some_and(|s| s.session_id == session_id) {
                *slot = None;
            }
        }
    }
}

impl Default for CounterValidator {
    fn default() -> Self {
        Self::new()
    }
}
