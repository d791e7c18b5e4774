use anyhow::Result;

use super::{ClusterValue, CLUSTER_ID_TEMPERATURE_MEASUREMENT, ENDPOINT_SENSOR};
use crate::attributes::{AttributePath, AttributeStore, AttributeValue};
use crate::interaction::StatusCode;

pub const ATTR_ID_MEASURED_VALUE: u32 = 0x0000;
pub const ATTR_ID_MIN_MEASURED_VALUE: u32 = 0x0001;
pub const ATTR_ID_MAX_MEASURED_VALUE: u32 = 0x0002;
pub const ATTR_ID_TOLERANCE: u32 = 0x0003;

// hundredths of a degree celsius
pub const MIN_MEASURED_VALUE: i16 = 0;
pub const MAX_MEASURED_VALUE: i16 = 10000;
pub const TOLERANCE: u16 = 100;

pub fn measured_value_path() -> AttributePath {
    AttributePath::new(
        ENDPOINT_SENSOR,
        CLUSTER_ID_TEMPERATURE_MEASUREMENT,
        ATTR_ID_MEASURED_VALUE,
    )
}

pub(super) fn register(store: &AttributeStore) -> Result<()> {
    store.register(measured_value_path(), AttributeValue::I16(0))
}

pub(super) fn read(store: &AttributeStore, path: &AttributePath) -> Result<ClusterValue, StatusCode> {
    match path.attribute {
        ATTR_ID_MEASURED_VALUE => super::stored(store, path),
        ATTR_ID_MIN_MEASURED_VALUE => Ok(ClusterValue::Int(MIN_MEASURED_VALUE as i64)),
        ATTR_ID_MAX_MEASURED_VALUE => Ok(ClusterValue::Int(MAX_MEASURED_VALUE as i64)),
        ATTR_ID_TOLERANCE => Ok(ClusterValue::UInt(TOLERANCE as u64)),
        _ => Err(StatusCode::UnsupportedAttribute),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measured_and_constants() {
        let store = AttributeStore::new();
        register(&store).unwrap();
        store
            .update(measured_value_path(), AttributeValue::I16(-250))
            .unwrap();
        let p = |a| AttributePath::new(ENDPOINT_SENSOR, CLUSTER_ID_TEMPERATURE_MEASUREMENT, a);
        assert_eq!(read(&store, &p(ATTR_ID_MEASURED_VALUE)), Ok(ClusterValue::Int(-250)));
        assert_eq!(read(&store, &p(ATTR_ID_MAX_MEASURED_VALUE)), Ok(ClusterValue::Int(10000)));
        assert_eq!(read(&store, &p(ATTR_ID_TOLERANCE)), Ok(ClusterValue::UInt(100)));
        assert_eq!(read(&store, &p(4)), Err(StatusCode::UnsupportedAttribute));
    }
}
