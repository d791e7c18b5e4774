use anyhow::Result;

use super::StatusCode;
use crate::clusters::{network_commissioning::NetworkCommissioning, Cluster};
use crate::tlv::{Tag, TlvItem, TlvWriter};

const TAG_INVOKE_REQUESTS: u8 = 2;

const TAG_COMMAND_PATH: u8 = 0;
const TAG_COMMAND_FIELDS: u8 = 1;
const TAG_CMD_PATH_ENDPOINT: u8 = 0;
const TAG_CMD_PATH_CLUSTER: u8 = 1;
const TAG_CMD_PATH_COMMAND: u8 = 2;

const TAG_RESPONSE_SUPPRESS: u8 = 0;
const TAG_RESPONSE_INVOKE_RESPONSES: u8 = 1;
const TAG_RESPONSE_COMMAND: u8 = 0;
const TAG_RESPONSE_STATUS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandPath {
    endpoint: u16,
    cluster: u32,
    command: u32,
}

impl CommandPath {
    fn from_tlv(item: &TlvItem) -> Option<Self> {
        Some(Self {
            endpoint: item.get_u16(&[TAG_CMD_PATH_ENDPOINT])?,
            cluster: item.get_u32(&[TAG_CMD_PATH_CLUSTER])?,
            command: item.get_u32(&[TAG_CMD_PATH_COMMAND])?,
        })
    }

    fn encode(&self, tlv: &mut TlvWriter, tag: impl Into<Tag>) -> Result<()> {
        tlv.start_list(tag)?;
        tlv.write_uint(TAG_CMD_PATH_ENDPOINT, self.endpoint as u64)?;
        tlv.write_uint(TAG_CMD_PATH_CLUSTER, self.cluster as u64)?;
        tlv.write_uint(TAG_CMD_PATH_COMMAND, self.command as u64)?;
        tlv.end_container()?;
        Ok(())
    }
}

fn dispatch(
    network: &mut NetworkCommissioning,
    path: &CommandPath,
    fields: Option<&TlvItem>,
) -> Result<(u32, u8), StatusCode> {
    // only network commissioning accepts commands
    match Cluster::from_id(path.cluster) {
        Some(c @ Cluster::NetworkCommissioning) if c.serves_endpoint(path.endpoint) => network
            .invoke(path.command, fields)
            .map(|(response, status)| (response, status as u8)),
        _ => Err(StatusCode::UnsupportedCommand),
    }
}

/// Handle InvokeRequest. Network commissioning commands answer with a response command
/// carrying the networking status, everything else gets a CommandStatusIB.
pub fn handle_invoke_request(network: &mut NetworkCommissioning, payload: &[u8]) -> Result<Vec<u8>> {
    let request = super::decode_request(payload)?;
    let commands: &[TlvItem] = request
        .get_item(&[TAG_INVOKE_REQUESTS])
        .map(|i| i.children())
        .unwrap_or(&[]);

    let mut tlv = super::response_writer();
    tlv.start_struct(Tag::Anonymous)?;
    tlv.write_bool(TAG_RESPONSE_SUPPRESS, false)?;
    tlv.start_array(TAG_RESPONSE_INVOKE_RESPONSES)?;
    for command in commands.iter().take(super::MAX_PATHS_PER_REQUEST) {
        let Some(path) = command
            .get_item(&[TAG_COMMAND_PATH])
            .and_then(CommandPath::from_tlv)
        else {
            log::debug!("invoke request without complete command path");
            continue;
        };
        let fields = command.get_item(&[TAG_COMMAND_FIELDS]);
        tlv.start_struct(Tag::Anonymous)?;
        match dispatch(network, &path, fields) {
            Ok((response_command, status)) => {
                log::debug!(
                    "command 0x{:x}/0x{:x} -> networking status {}",
                    path.cluster,
                    path.command,
                    status
                );
                let response_path = CommandPath {
                    command: response_command,
                    ..path
                };
                tlv.start_struct(TAG_RESPONSE_COMMAND)?;
                response_path.encode(&mut tlv, TAG_COMMAND_PATH)?;
                tlv.start_struct(TAG_COMMAND_FIELDS)?;
                tlv.write_uint(0, status as u64)?;
                tlv.end_container()?;
                tlv.end_container()?;
            }
            Err(status) => {
                log::debug!(
                    "command 0x{:x}/0x{:x} rejected: {}",
                    path.cluster,
                    path.command,
                    status
                );
                tlv.start_struct(TAG_RESPONSE_STATUS)?;
                path.encode(&mut tlv, TAG_COMMAND_PATH)?;
                super::encode_status_ib(&mut tlv, 1, status)?;
                tlv.end_container()?;
            }
        }
        tlv.end_container()?;
    }
    tlv.end_container()?;
    tlv.end_container()?;
    Ok(tlv.into_vec())
}

/// Build InvokeRequest with one command, used by commissioner tooling and tests.
pub fn encode_invoke_request(
    endpoint: u16,
    cluster: u32,
    command: u32,
    fields: &[(u8, &[u8])],
) -> Result<Vec<u8>> {
    let mut tlv = TlvWriter::new();
    tlv.start_struct(Tag::Anonymous)?;
    tlv.write_bool(0, false)?;
    tlv.write_bool(1, false)?;
    tlv.start_array(TAG_INVOKE_REQUESTS)?;
    tlv.start_struct(Tag::Anonymous)?;
    CommandPath {
        endpoint,
        cluster,
        command,
    }
    .encode(&mut tlv, TAG_COMMAND_PATH)?;
    tlv.start_struct(TAG_COMMAND_FIELDS)?;
    for (tag, value) in fields {
        tlv.write_bytes(*tag, value)?;
    }
    tlv.end_container()?;
    tlv.end_container()?;
    tlv.end_container()?;
    tlv.end_container()?;
    Ok(tlv.into_vec())
}
