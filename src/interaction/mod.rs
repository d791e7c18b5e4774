//! Interaction model handlers: read, subscribe, report, invoke and write.
//!
//! Requests and responses are TLV structures using Matter interaction model tags.
//! An attribute path is a list `{2: endpoint, 3: cluster, 4: attribute}`.

pub mod invoke;
pub mod read;
pub mod report;
pub mod subscribe;
pub mod write;

use anyhow::Result;

use crate::attributes::AttributePath;
use crate::clusters::{self, ClusterContext};
use crate::messages;
use crate::tlv::{self, Tag, TlvItem, TlvWriter};

pub const MAX_PATHS_PER_REQUEST: usize = 16;

pub(crate) const TAG_PATH_ENDPOINT: u8 = 2;
pub(crate) const TAG_PATH_CLUSTER: u8 = 3;
pub(crate) const TAG_PATH_ATTRIBUTE: u8 = 4;

/// Interaction model status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success = 0x00,
    Failure = 0x01,
    InvalidSubscription = 0x7d,
    UnsupportedAccess = 0x7e,
    UnsupportedEndpoint = 0x7f,
    InvalidAction = 0x80,
    UnsupportedCommand = 0x81,
    InvalidCommand = 0x85,
    UnsupportedAttribute = 0x86,
    ConstraintError = 0x87,
    UnsupportedWrite = 0x88,
    ResourceExhausted = 0x89,
    NotFound = 0x8b,
    UnreportableAttribute = 0x8c,
    InvalidDataType = 0x8d,
    UnsupportedRead = 0x8f,
    DataVersionMismatch = 0x92,
    Timeout = 0x94,
    Busy = 0x9c,
    UnsupportedCluster = 0xc3,
    NoUpstreamSubscription = 0xc5,
    NeedsTimedInteraction = 0xc6,
    UnsupportedEvent = 0xc7,
    PathsExhausted = 0xc8,
    TimedRequestMismatch = 0xc9,
    FailsafeRequired = 0xca,
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => StatusCode::Success,
            0x7d => StatusCode::InvalidSubscription,
            0x7e => StatusCode::UnsupportedAccess,
            0x7f => StatusCode::UnsupportedEndpoint,
            0x80 => StatusCode::InvalidAction,
            0x81 => StatusCode::UnsupportedCommand,
            0x85 => StatusCode::InvalidCommand,
            0x86 => StatusCode::UnsupportedAttribute,
            0x87 => StatusCode::ConstraintError,
            0x88 => StatusCode::UnsupportedWrite,
            0x89 => StatusCode::ResourceExhausted,
            0x8b => StatusCode::NotFound,
            0x8c => StatusCode::UnreportableAttribute,
            0x8d => StatusCode::InvalidDataType,
            0x8f => StatusCode::UnsupportedRead,
            0x92 => StatusCode::DataVersionMismatch,
            0x94 => StatusCode::Timeout,
            0x9c => StatusCode::Busy,
            0xc3 => StatusCode::UnsupportedCluster,
            0xc5 => StatusCode::NoUpstreamSubscription,
            0xc6 => StatusCode::NeedsTimedInteraction,
            0xc7 => StatusCode::UnsupportedEvent,
            0xc8 => StatusCode::PathsExhausted,
            0xc9 => StatusCode::TimedRequestMismatch,
            0xca => StatusCode::FailsafeRequired,
            _ => StatusCode::Failure,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::Failure => "FAILURE",
            StatusCode::InvalidSubscription => "INVALID_SUBSCRIPTION",
            StatusCode::UnsupportedAccess => "UNSUPPORTED_ACCESS",
            StatusCode::UnsupportedEndpoint => "UNSUPPORTED_ENDPOINT",
            StatusCode::InvalidAction => "INVALID_ACTION",
            StatusCode::UnsupportedCommand => "UNSUPPORTED_COMMAND",
            StatusCode::InvalidCommand => "INVALID_COMMAND",
            StatusCode::UnsupportedAttribute => "UNSUPPORTED_ATTRIBUTE",
            StatusCode::ConstraintError => "CONSTRAINT_ERROR",
            StatusCode::UnsupportedWrite => "UNSUPPORTED_WRITE",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::UnreportableAttribute => "UNREPORTABLE_ATTRIBUTE",
            StatusCode::InvalidDataType => "INVALID_DATA_TYPE",
            StatusCode::UnsupportedRead => "UNSUPPORTED_READ",
            StatusCode::DataVersionMismatch => "DATA_VERSION_MISMATCH",
            StatusCode::Timeout => "TIMEOUT",
            StatusCode::Busy => "BUSY",
            StatusCode::UnsupportedCluster => "UNSUPPORTED_CLUSTER",
            StatusCode::NoUpstreamSubscription => "NO_UPSTREAM_SUBSCRIPTION",
            StatusCode::NeedsTimedInteraction => "NEEDS_TIMED_INTERACTION",
            StatusCode::UnsupportedEvent => "UNSUPPORTED_EVENT",
            StatusCode::PathsExhausted => "PATHS_EXHAUSTED",
            StatusCode::TimedRequestMismatch => "TIMED_REQUEST_MISMATCH",
            StatusCode::FailsafeRequired => "FAILSAFE_REQUIRED",
        };
        write!(f, "{}", name)
    }
}

/// Path as received. Fields missing in the request are None.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestPath {
    pub endpoint: Option<u16>,
    pub cluster: Option<u32>,
    pub attribute: Option<u32>,
}

impl RequestPath {
    pub fn from_tlv(item: &TlvItem) -> Self {
        Self {
            endpoint: item.get_u16(&[TAG_PATH_ENDPOINT]),
            cluster: item.get_u32(&[TAG_PATH_CLUSTER]),
            attribute: item.get_u32(&[TAG_PATH_ATTRIBUTE]),
        }
    }

    /// Concrete path, None when any field is missing (wildcards are not supported).
    pub fn concrete(&self) -> Option<AttributePath> {
        Some(AttributePath::new(
            self.endpoint?,
            self.cluster?,
            self.attribute?,
        ))
    }
}

/// Paths from list at `tag`, at most [MAX_PATHS_PER_REQUEST].
pub(crate) fn request_paths(request: &TlvItem, tag: u8) -> Vec<RequestPath> {
    let Some(list) = request.get_item(&[tag]) else {
        return Vec::new();
    };
    let paths = list.children();
    if paths.len() > MAX_PATHS_PER_REQUEST {
        log::warn!(
            "request carries {} paths, processing first {}",
            paths.len(),
            MAX_PATHS_PER_REQUEST
        );
    }
    paths
        .iter()
        .take(MAX_PATHS_PER_REQUEST)
        .map(RequestPath::from_tlv)
        .collect()
}

pub(crate) fn encode_path(tlv: &mut TlvWriter, tag: impl Into<Tag>, path: &RequestPath) -> Result<()> {
    tlv.start_list(tag)?;
    if let Some(e) = path.endpoint {
        tlv.write_uint(TAG_PATH_ENDPOINT, e as u64)?;
    }
    if let Some(c) = path.cluster {
        tlv.write_uint(TAG_PATH_CLUSTER, c as u64)?;
    }
    if let Some(a) = path.attribute {
        tlv.write_uint(TAG_PATH_ATTRIBUTE, a as u64)?;
    }
    tlv.end_container()?;
    Ok(())
}

impl From<AttributePath> for RequestPath {
    fn from(p: AttributePath) -> Self {
        Self {
            endpoint: Some(p.endpoint),
            cluster: Some(p.cluster),
            attribute: Some(p.attribute),
        }
    }
}

/// StatusIB {0: status}
pub(crate) fn encode_status_ib(tlv: &mut TlvWriter, tag: impl Into<Tag>, status: StatusCode) -> Result<()> {
    tlv.start_struct(tag)?;
    tlv.write_uint(0, status as u64)?;
    tlv.end_container()?;
    Ok(())
}

/// One AttributeReportIB: either AttributeDataIB with value or AttributeStatusIB with error.
pub(crate) fn encode_attribute_report(
    tlv: &mut TlvWriter,
    ctx: &ClusterContext,
    path: &RequestPath,
) -> Result<()> {
    let result = match path.concrete() {
        Some(p) => clusters::read_attribute(ctx, &p),
        None => Err(StatusCode::InvalidAction),
    };
    tlv.start_struct(Tag::Anonymous)?;
    match result {
        Ok(value) => {
            tlv.start_struct(1)?;
            tlv.write_uint(0, 0)?;
            encode_path(tlv, 1, path)?;
            value.encode(tlv, 2)?;
            tlv.end_container()?;
        }
        Err(status) => {
            log::debug!("read {:?} failed: {}", path, status);
            tlv.start_struct(0)?;
            encode_path(tlv, 0, path)?;
            encode_status_ib(tlv, 1, status)?;
            tlv.end_container()?;
        }
    }
    tlv.end_container()?;
    Ok(())
}

impl std::error::Error for StatusCode {}

/// Writer for response payloads, bounded so the secured message still fits one datagram.
pub(crate) fn response_writer() -> TlvWriter {
    TlvWriter::with_capacity(messages::MAX_APPLICATION_PAYLOAD_SIZE)
}

/// Status to answer a failed request with. None means the request is dropped silently.
/// Handlers signal a status by returning [StatusCode] as error, a full response
/// buffer becomes ResourceExhausted.
pub fn error_status(e: &anyhow::Error) -> Option<StatusCode> {
    if let Some(status) = e.downcast_ref::<StatusCode>() {
        return Some(*status);
    }
    match e.downcast_ref::<std::io::Error>() {
        Some(io) if io.kind() == std::io::ErrorKind::WriteZero => Some(StatusCode::ResourceExhausted),
        _ => None,
    }
}

/// Response to interaction opcodes the device does not implement:
/// StatusResponseMessage {0: status}.
pub fn encode_status_response(status: StatusCode) -> Result<Vec<u8>> {
    let mut tlv = TlvWriter::new();
    tlv.start_struct(Tag::Anonymous)?;
    tlv.write_uint(0, status as u64)?;
    tlv.end_container()?;
    Ok(tlv.into_vec())
}

pub(crate) fn decode_request(payload: &[u8]) -> Result<TlvItem> {
    Ok(tlv::decode_tlv(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(StatusCode::from(0xc3), StatusCode::UnsupportedCluster);
        assert_eq!(StatusCode::from(0x7f) as u8, 0x7f);
        assert_eq!(StatusCode::from(0x42), StatusCode::Failure);
        assert_eq!(StatusCode::UnsupportedWrite.to_string(), "UNSUPPORTED_WRITE");
    }

    #[test]
    fn failures_mapped_to_status() {
        let mut tlv = response_writer();
        let full = tlv
            .write_bytes(0, &[0; messages::MAX_APPLICATION_PAYLOAD_SIZE])
            .unwrap_err();
        assert_eq!(
            error_status(&anyhow::Error::new(full).context("encoding report")),
            Some(StatusCode::ResourceExhausted)
        );
        assert_eq!(
            error_status(&StatusCode::InvalidAction.into()),
            Some(StatusCode::InvalidAction)
        );
        let malformed = tlv::decode_tlv(&[0x15]).unwrap_err();
        assert_eq!(error_status(&malformed.into()), None);
    }

    #[test]
    fn paths() {
        let mut tlv = TlvWriter::new();
        tlv.start_struct(Tag::Anonymous).unwrap();
        tlv.start_array(0).unwrap();
        encode_path(&mut tlv, Tag::Anonymous, &AttributePath::new(1, 6, 0).into()).unwrap();
        encode_path(
            &mut tlv,
            Tag::Anonymous,
            &RequestPath {
                endpoint: Some(1),
                cluster: None,
                attribute: Some(0),
            },
        )
        .unwrap();
        tlv.end_container().unwrap();
        tlv.end_container().unwrap();

        let t = tlv::decode_tlv(tlv.as_slice()).unwrap();
        let p = request_paths(&t, 0);
        assert_eq!(p.len(), 2);
        assert_eq!(p[0].concrete(), Some(AttributePath::new(1, 6, 0)));
        assert_eq!(p[1].concrete(), None);
        assert!(request_paths(&t, 7).is_empty());
    }
}
