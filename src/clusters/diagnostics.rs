use anyhow::Result;

use super::{ClusterValue, CLUSTER_ID_GENERAL_DIAGNOSTICS, ENDPOINT_SENSOR};
use crate::attributes::{AttributePath, AttributeStore, AttributeValue};
use crate::interaction::StatusCode;

pub const ATTR_ID_ACTIVE_FAULTS: u32 = 0x0001;
pub const ATTR_ID_TOTAL_OPERATIONAL_HOURS: u32 = 0x0003;
pub const ATTR_ID_DEVICE_ENABLED_STATE: u32 = 0x0005;

pub fn path(attribute: u32) -> AttributePath {
    AttributePath::new(ENDPOINT_SENSOR, CLUSTER_ID_GENERAL_DIAGNOSTICS, attribute)
}

pub(super) fn register(store: &AttributeStore) -> Result<()> {
    store.register(path(ATTR_ID_ACTIVE_FAULTS), AttributeValue::U8(0))?;
    store.register(path(ATTR_ID_TOTAL_OPERATIONAL_HOURS), AttributeValue::U32(0))?;
    store.register(path(ATTR_ID_DEVICE_ENABLED_STATE), AttributeValue::U8(1))?;
    Ok(())
}

pub(super) fn read(store: &AttributeStore, path: &AttributePath) -> Result<ClusterValue, StatusCode> {
    match path.attribute {
        ATTR_ID_ACTIVE_FAULTS | ATTR_ID_TOTAL_OPERATIONAL_HOURS | ATTR_ID_DEVICE_ENABLED_STATE => {
            super::stored(store, path)
        }
        _ => Err(StatusCode::UnsupportedAttribute),
    }
}
