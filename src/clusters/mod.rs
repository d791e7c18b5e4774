//! Cluster adapters exposed by the device.
//!
//! Routing is a closed set: every supported cluster is a [Cluster] variant and reads
//! are dispatched by cluster id. Stored values come from the
//! [AttributeStore](crate::attributes::AttributeStore), constant attributes are
//! answered directly.

pub mod descriptor;
pub mod diagnostics;
pub mod level_control;
pub mod network_commissioning;
pub mod on_off;
pub mod temperature;

use anyhow::Result;

use crate::attributes::{AttributePath, AttributeStore, AttributeValue};
use crate::interaction::StatusCode;
use crate::tlv::{Tag, TlvWriter};

pub const ENDPOINT_ROOT: u16 = 0;
pub const ENDPOINT_SENSOR: u16 = 1;

pub const CLUSTER_ID_ON_OFF: u32 = 0x0006;
pub const CLUSTER_ID_LEVEL_CONTROL: u32 = 0x0008;
pub const CLUSTER_ID_DESCRIPTOR: u32 = 0x001d;
pub const CLUSTER_ID_NETWORK_COMMISSIONING: u32 = 0x0031;
pub const CLUSTER_ID_GENERAL_DIAGNOSTICS: u32 = 0x0033;
pub const CLUSTER_ID_TEMPERATURE_MEASUREMENT: u32 = 0x0402;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cluster {
    OnOff,
    LevelControl,
    TemperatureMeasurement,
    GeneralDiagnostics,
    NetworkCommissioning,
    Descriptor,
}

impl Cluster {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            CLUSTER_ID_ON_OFF => Some(Cluster::OnOff),
            CLUSTER_ID_LEVEL_CONTROL => Some(Cluster::LevelControl),
            CLUSTER_ID_TEMPERATURE_MEASUREMENT => Some(Cluster::TemperatureMeasurement),
            CLUSTER_ID_GENERAL_DIAGNOSTICS => Some(Cluster::GeneralDiagnostics),
            CLUSTER_ID_NETWORK_COMMISSIONING => Some(Cluster::NetworkCommissioning),
            CLUSTER_ID_DESCRIPTOR => Some(Cluster::Descriptor),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Cluster::OnOff => CLUSTER_ID_ON_OFF,
            Cluster::LevelControl => CLUSTER_ID_LEVEL_CONTROL,
            Cluster::TemperatureMeasurement => CLUSTER_ID_TEMPERATURE_MEASUREMENT,
            Cluster::GeneralDiagnostics => CLUSTER_ID_GENERAL_DIAGNOSTICS,
            Cluster::NetworkCommissioning => CLUSTER_ID_NETWORK_COMMISSIONING,
            Cluster::Descriptor => CLUSTER_ID_DESCRIPTOR,
        }
    }

    pub fn serves_endpoint(&self, endpoint: u16) -> bool {
        match self {
            Cluster::NetworkCommissioning => endpoint == ENDPOINT_ROOT,
            Cluster::Descriptor => endpoint == ENDPOINT_ROOT || endpoint == ENDPOINT_SENSOR,
            _ => endpoint == ENDPOINT_SENSOR,
        }
    }
}

/// Value produced by a cluster read, richer than what the store holds.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterValue {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Bytes(Vec<u8>),
    Array(Vec<ClusterValue>),
    /// Structure of context tagged fields.
    Struct(Vec<(u8, ClusterValue)>),
}

impl From<AttributeValue> for ClusterValue {
    fn from(v: AttributeValue) -> Self {
        match v {
            AttributeValue::Bool(b) => ClusterValue::Bool(b),
            AttributeValue::U8(u) => ClusterValue::UInt(u as u64),
            AttributeValue::I16(i) => ClusterValue::Int(i as i64),
            AttributeValue::U16(u) => ClusterValue::UInt(u as u64),
            AttributeValue::U32(u) => ClusterValue::UInt(u as u64),
        }
    }
}

impl ClusterValue {
    pub fn encode(&self, tlv: &mut TlvWriter, tag: impl Into<Tag>) -> Result<()> {
        let tag = tag.into();
        match self {
            ClusterValue::Bool(b) => tlv.write_bool(tag, *b)?,
            ClusterValue::UInt(u) => tlv.write_uint(tag, *u)?,
            ClusterValue::Int(i) => tlv.write_int(tag, *i)?,
            ClusterValue::Bytes(b) => tlv.write_bytes(tag, b)?,
            ClusterValue::Array(items) => {
                tlv.start_array(tag)?;
                for i in items {
                    i.encode(tlv, Tag::Anonymous)?;
                }
                tlv.end_container()?;
            }
            ClusterValue::Struct(fields) => {
                tlv.start_struct(tag)?;
                for (t, v) in fields {
                    v.encode(tlv, *t)?;
                }
                tlv.end_container()?;
            }
        }
        Ok(())
    }
}

/// State the cluster adapters read from.
pub struct ClusterContext<'a> {
    pub store: &'a AttributeStore,
    pub network: &'a network_commissioning::NetworkCommissioning,
}

pub(crate) fn stored(store: &AttributeStore, path: &AttributePath) -> Result<ClusterValue, StatusCode> {
    store
        .get(path)
        .map(ClusterValue::from)
        .ok_or(StatusCode::UnsupportedAttribute)
}

/// Read one attribute, errors are interaction model status codes.
pub fn read_attribute(ctx: &ClusterContext, path: &AttributePath) -> Result<ClusterValue, StatusCode> {
    let cluster = Cluster::from_id(path.cluster).ok_or(StatusCode::UnsupportedCluster)?;
    if !cluster.serves_endpoint(path.endpoint) {
        return Err(StatusCode::UnsupportedEndpoint);
    }
    match cluster {
        Cluster::OnOff => on_off::read(ctx.store, path),
        Cluster::LevelControl => level_control::read(ctx.store, path),
        Cluster::TemperatureMeasurement => temperature::read(ctx.store, path),
        Cluster::GeneralDiagnostics => diagnostics::read(ctx.store, path),
        Cluster::NetworkCommissioning => ctx.network.read(path.attribute),
        Cluster::Descriptor => descriptor::read(path.endpoint, path.attribute),
    }
}

/// Register store backed attributes of all sensor clusters with their defaults.
pub fn register_defaults(store: &AttributeStore) -> Result<()> {
    on_off::register(store)?;
    level_control::register(store)?;
    temperature::register(store)?;
    diagnostics::register(store)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    #[test]
    fn dispatch_errors() {
        let store = AttributeStore::new();
        register_defaults(&store).unwrap();
        let network = network_commissioning::NetworkCommissioning::with_storage(Arc::new(
            MemoryStorage::new(),
        ));
        let ctx = ClusterContext {
            store: &store,
            network: &network,
        };
        assert_eq!(
            read_attribute(&ctx, &AttributePath::new(1, 0x9999, 0)),
            Err(StatusCode::UnsupportedCluster)
        );
        assert_eq!(
            read_attribute(&ctx, &AttributePath::new(2, CLUSTER_ID_ON_OFF, 0)),
            Err(StatusCode::UnsupportedEndpoint)
        );
        assert_eq!(
            read_attribute(&ctx, &AttributePath::new(1, CLUSTER_ID_NETWORK_COMMISSIONING, 0)),
            Err(StatusCode::UnsupportedEndpoint)
        );
        assert_eq!(
            read_attribute(&ctx, &AttributePath::new(1, CLUSTER_ID_ON_OFF, 0x55)),
            Err(StatusCode::UnsupportedAttribute)
        );
        assert_eq!(
            read_attribute(&ctx, &AttributePath::new(1, CLUSTER_ID_ON_OFF, 0)),
            Ok(ClusterValue::Bool(false))
        );
        assert_eq!(
            read_attribute(&ctx, &AttributePath::new(0, CLUSTER_ID_NETWORK_COMMISSIONING, 0)),
            Ok(ClusterValue::UInt(1))
        );
    }

    #[test]
    fn missing_stored_value() {
        let store = AttributeStore::new();
        let network = network_commissioning::NetworkCommissioning::with_storage(Arc::new(
            MemoryStorage::new(),
        ));
        let ctx = ClusterContext {
            store: &store,
            network: &network,
        };
        assert_eq!(
            read_attribute(&ctx, &AttributePath::new(1, CLUSTER_ID_TEMPERATURE_MEASUREMENT, 0)),
            Err(StatusCode::UnsupportedAttribute)
        );
    }

    #[test]
    fn value_encoding() {
        let v = ClusterValue::Array(vec![ClusterValue::Struct(vec![
            (0, ClusterValue::UInt(0x16)),
            (1, ClusterValue::UInt(1)),
        ])]);
        let mut tlv = TlvWriter::new();
        v.encode(&mut tlv, 2).unwrap();
        assert_eq!(
            tlv.as_slice(),
            &[0x36, 0x02, 0x15, 0x24, 0x00, 0x16, 0x24, 0x01, 0x01, 0x18, 0x18]
        );
    }
}
