use anyhow::Result;

use super::{ClusterValue, CLUSTER_ID_ON_OFF, ENDPOINT_SENSOR};
use crate::attributes::{AttributePath, AttributeStore, AttributeValue};
use crate::interaction::StatusCode;

pub const ATTR_ID_ON_OFF: u32 = 0x0000;

pub fn path() -> AttributePath {
    AttributePath::new(ENDPOINT_SENSOR, CLUSTER_ID_ON_OFF, ATTR_ID_ON_OFF)
}

pub(super) fn register(store: &AttributeStore) -> Result<()> {
    store.register(path(), AttributeValue::Bool(false))
}

pub(super) fn read(store: &AttributeStore, path: &AttributePath) -> Result<ClusterValue, StatusCode> {
    match path.attribute {
        ATTR_ID_ON_OFF => super::stored(store, path),
        _ => Err(StatusCode::UnsupportedAttribute),
    }
}
