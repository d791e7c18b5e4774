use anyhow::Result;

use super::{ClusterValue, CLUSTER_ID_LEVEL_CONTROL, ENDPOINT_SENSOR};
use crate::attributes::{AttributePath, AttributeStore, AttributeValue};
use crate::interaction::StatusCode;

pub const ATTR_ID_CURRENT_LEVEL: u32 = 0x0000;
pub const ATTR_ID_MIN_LEVEL: u32 = 0x0002;
pub const ATTR_ID_MAX_LEVEL: u32 = 0x0003;

pub const MIN_LEVEL: u8 = 0;
/// Level is a percentage.
pub const MAX_LEVEL: u8 = 100;

pub fn current_level_path() -> AttributePath {
    AttributePath::new(ENDPOINT_SENSOR, CLUSTER_ID_LEVEL_CONTROL, ATTR_ID_CURRENT_LEVEL)
}

pub(super) fn register(store: &AttributeStore) -> Result<()> {
    store.register(current_level_path(), AttributeValue::U8(MIN_LEVEL))
}

pub(super) fn read(store: &AttributeStore, path: &AttributePath) -> Result<ClusterValue, StatusCode> {
    match path.attribute {
        ATTR_ID_CURRENT_LEVEL => super::stored(store, path),
        ATTR_ID_MIN_LEVEL => Ok(ClusterValue::UInt(MIN_LEVEL as u64)),
        ATTR_ID_MAX_LEVEL => Ok(ClusterValue::UInt(MAX_LEVEL as u64)),
        _ => Err(StatusCode::UnsupportedAttribute),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_bounds() {
        let store = AttributeStore::new();
        register(&store).unwrap();
        let p = |a| AttributePath::new(ENDPOINT_SENSOR, CLUSTER_ID_LEVEL_CONTROL, a);
        assert_eq!(read(&store, &p(ATTR_ID_MIN_LEVEL)), Ok(ClusterValue::UInt(0)));
        assert_eq!(read(&store, &p(ATTR_ID_MAX_LEVEL)), Ok(ClusterValue::UInt(100)));
        store
            .update(current_level_path(), AttributeValue::U8(42))
            .unwrap();
        assert_eq!(read(&store, &p(ATTR_ID_CURRENT_LEVEL)), Ok(ClusterValue::UInt(42)));
        assert_eq!(read(&store, &p(1)), Err(StatusCode::UnsupportedAttribute));
    }
}
