use super::{
    ClusterValue, CLUSTER_ID_DESCRIPTOR, CLUSTER_ID_GENERAL_DIAGNOSTICS, CLUSTER_ID_LEVEL_CONTROL,
    CLUSTER_ID_NETWORK_COMMISSIONING, CLUSTER_ID_ON_OFF, CLUSTER_ID_TEMPERATURE_MEASUREMENT,
    ENDPOINT_ROOT, ENDPOINT_SENSOR,
};
use crate::interaction::StatusCode;

pub const ATTR_ID_DEVICE_TYPE_LIST: u32 = 0x0000;
pub const ATTR_ID_SERVER_LIST: u32 = 0x0001;
pub const ATTR_ID_CLIENT_LIST: u32 = 0x0002;
pub const ATTR_ID_PARTS_LIST: u32 = 0x0003;

pub const DEVICE_TYPE_ROOT_NODE: u32 = 0x0016;
pub const DEVICE_TYPE_TEMPERATURE_SENSOR: u32 = 0x0302;

struct EndpointDescription {
    device_type: u32,
    revision: u16,
    servers: &'static [u32],
    parts: &'static [u16],
}

const ROOT: EndpointDescription = EndpointDescription {
    device_type: DEVICE_TYPE_ROOT_NODE,
    revision: 1,
    servers: &[CLUSTER_ID_DESCRIPTOR, CLUSTER_ID_NETWORK_COMMISSIONING],
    parts: &[ENDPOINT_SENSOR],
};

const SENSOR: EndpointDescription = EndpointDescription {
    device_type: DEVICE_TYPE_TEMPERATURE_SENSOR,
    revision: 1,
    servers: &[
        CLUSTER_ID_ON_OFF,
        CLUSTER_ID_LEVEL_CONTROL,
        CLUSTER_ID_TEMPERATURE_MEASUREMENT,
        CLUSTER_ID_GENERAL_DIAGNOSTICS,
        CLUSTER_ID_DESCRIPTOR,
    ],
    parts: &[],
};

pub(super) fn read(endpoint: u16, attribute: u32) -> Result<ClusterValue, StatusCode> {
    let desc = match endpoint {
        ENDPOINT_ROOT => &ROOT,
        ENDPOINT_SENSOR => &SENSOR,
        _ => return Err(StatusCode::UnsupportedEndpoint),
    };
    match attribute {
        // DeviceTypeStruct {0: device type, 1: revision}
        ATTR_ID_DEVICE_TYPE_LIST => Ok(ClusterValue::Array(vec![ClusterValue::Struct(vec![
            (0, ClusterValue::UInt(desc.device_type as u64)),
            (1, ClusterValue::UInt(desc.revision as u64)),
        ])])),
        ATTR_ID_SERVER_LIST => Ok(ClusterValue::Array(
            desc.servers
                .iter()
                .map(|c| ClusterValue::UInt(*c as u64))
                .collect(),
        )),
        ATTR_ID_CLIENT_LIST => Ok(ClusterValue::Array(Vec::new())),
        ATTR_ID_PARTS_LIST => Ok(ClusterValue::Array(
            desc.parts
                .iter()
                .map(|e| ClusterValue::UInt(*e as u64))
                .collect(),
        )),
        _ => Err(StatusCode::UnsupportedAttribute),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints() {
        assert_eq!(
            read(0, ATTR_ID_PARTS_LIST),
            Ok(ClusterValue::Array(vec![ClusterValue::UInt(1)]))
        );
        assert_eq!(read(1, ATTR_ID_PARTS_LIST), Ok(ClusterValue::Array(vec![])));
        assert_eq!(
            read(1, ATTR_ID_DEVICE_TYPE_LIST),
            Ok(ClusterValue::Array(vec![ClusterValue::Struct(vec![
                (0, ClusterValue::UInt(0x0302)),
                (1, ClusterValue::UInt(1)),
            ])]))
        );
        match read(1, ATTR_ID_SERVER_LIST) {
            Ok(ClusterValue::Array(servers)) => {
                assert_eq!(servers.len(), 5);
                assert!(servers.contains(&ClusterValue::UInt(CLUSTER_ID_TEMPERATURE_MEASUREMENT as u64)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(read(0, 9), Err(StatusCode::UnsupportedAttribute));
        assert_eq!(read(5, 0), Err(StatusCode::UnsupportedEndpoint));
    }
}
