//! Sensor side of the device.
//!
//! The serial parser produces [SensorReading]s and hands them to the protocol task
//! through a bounded channel. [apply_reading] is the only path by which sensor data
//! reaches the attribute store.

use anyhow::Result;
use tokio::sync::mpsc;

use crate::attributes::{AttributeStore, AttributeValue};
use crate::clusters::{diagnostics, level_control, on_off, temperature};

pub const READING_QUEUE_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorReading {
    pub flame_detected: bool,
    /// percent, 0..=100
    pub fan_speed: u8,
    /// whole degrees celsius
    pub temperature: i16,
    pub error_code: u8,
    pub valid: bool,
}

/// Producer handle. Readings are dropped when the protocol task falls behind.
#[derive(Clone)]
pub struct ReadingSender {
    sender: mpsc::Sender<SensorReading>,
}

impl ReadingSender {
    /// Returns false when reading was dropped.
    pub fn send(&self, reading: SensorReading) -> bool {
        match self.sender.try_send(reading) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::debug!("reading queue full, dropping reading");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::warn!("reading queue closed");
                false
            }
        }
    }
}

pub fn channel() -> (ReadingSender, mpsc::Receiver<SensorReading>) {
    let (sender, receiver) = mpsc::channel(READING_QUEUE_SIZE);
    (ReadingSender { sender }, receiver)
}

fn centi_celsius(temperature: i16) -> i16 {
    (temperature as i32 * 100).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Copy reading into store. Returns number of attributes which changed.
pub fn apply_reading(store: &AttributeStore, reading: &SensorReading) -> Result<usize> {
    if !reading.valid {
        log::trace!("ignoring invalid reading");
        return Ok(0);
    }
    let updates = [
        (on_off::path(), AttributeValue::Bool(reading.flame_detected)),
        (
            level_control::current_level_path(),
            AttributeValue::U8(reading.fan_speed.min(level_control::MAX_LEVEL)),
        ),
        (
            temperature::measured_value_path(),
            AttributeValue::I16(centi_celsius(reading.temperature)),
        ),
        (
            diagnostics::path(diagnostics::ATTR_ID_ACTIVE_FAULTS),
            AttributeValue::U8(reading.error_code),
        ),
    ];
    let mut changed = 0;
    for (path, value) in updates {
        if store.update(path, value)? {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Apply every queued reading. Returns number of readings consumed.
pub fn drain_readings(receiver: &mut mpsc::Receiver<SensorReading>, store: &AttributeStore) -> usize {
    let mut count = 0;
    while let Ok(reading) = receiver.try_recv() {
        if let Err(e) = apply_reading(store, &reading) {
            log::error!("can't apply reading: {:#}", e);
        }
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusters;

    fn store() -> std::sync::Arc<AttributeStore> {
        let store = AttributeStore::new();
        clusters::register_defaults(&store).unwrap();
        store
    }

    #[test]
    fn reading_updates_attributes() {
        let store = store();
        let reading = SensorReading {
            flame_detected: true,
            fan_speed: 150,
            temperature: 72,
            error_code: 3,
            valid: true,
        };
        assert_eq!(apply_reading(&store, &reading).unwrap(), 4);
        assert_eq!(store.get(&on_off::path()), Some(AttributeValue::Bool(true)));
        assert_eq!(
            store.get(&level_control::current_level_path()),
            Some(AttributeValue::U8(100))
        );
        assert_eq!(
            store.get(&temperature::measured_value_path()),
            Some(AttributeValue::I16(7200))
        );
        // unchanged
        assert_eq!(apply_reading(&store, &reading).unwrap(), 0);
        let invalid = SensorReading {
            valid: false,
            ..Default::default()
        };
        assert_eq!(apply_reading(&store, &invalid).unwrap(), 0);
        assert_eq!(centi_celsius(1000), i16::MAX);
    }

    #[test]
    fn bounded_queue() {
        let store = store();
        let (tx, mut rx) = channel();
        for i in 0..READING_QUEUE_SIZE + 2 {
            let sent = tx.send(SensorReading {
                fan_speed: i as u8,
                valid: true,
                ..Default::default()
            });
            assert_eq!(sent, i < READING_QUEUE_SIZE);
        }
        assert_eq!(drain_readings(&mut rx, &store), READING_QUEUE_SIZE);
        assert_eq!(
            store.get(&level_control::current_level_path()),
            Some(AttributeValue::U8(READING_QUEUE_SIZE as u8 - 1))
        );
        drop(rx);
        assert!(!tx.send(SensorReading::default()));
    }
}
