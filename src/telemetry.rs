//! Unauthenticated JSON-over-UDP attribute broadcast for dashboards.
//!
//! Independent from the protocol engine: no TLV, no sessions. Every attribute change
//! is sent as one line of JSON to each registered controller.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::net::UdpSocket;

use crate::attributes::{AttributePath, AttributeStore, AttributeValue};

pub const MAX_CONTROLLERS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Controller {
    addr: SocketAddr,
    last_report_ms: Option<u64>,
}

#[derive(Serialize)]
struct AttributeReport {
    #[serde(rename = "type")]
    kind: &'static str,
    endpoint: u16,
    cluster: String,
    attribute: String,
    value: serde_json::Value,
    timestamp: u64,
}

fn json_value(value: AttributeValue) -> serde_json::Value {
    match value {
        AttributeValue::Bool(v) => v.into(),
        AttributeValue::U8(v) => v.into(),
        AttributeValue::I16(v) => v.into(),
        AttributeValue::U16(v) => v.into(),
        AttributeValue::U32(v) => v.into(),
    }
}

/// One report line, newline terminated.
pub fn format_report(path: &AttributePath, value: AttributeValue, timestamp_ms: u64) -> Result<String> {
    let report = AttributeReport {
        kind: "attribute-report",
        endpoint: path.endpoint,
        cluster: format!("0x{:04x}", path.cluster),
        attribute: format!("0x{:04x}", path.attribute),
        value: json_value(value),
        timestamp: timestamp_ms,
    };
    let mut line = serde_json::to_string(&report)?;
    line.push('\n');
    Ok(line)
}

pub struct TelemetryReporter {
    socket: UdpSocket,
    controllers: Mutex<[Option<Controller>; MAX_CONTROLLERS]>,
    interval_ms: u64,
    started: Instant,
}

impl TelemetryReporter {
    /// `interval_ms` throttles reports per controller, 0 disables throttling.
    pub async fn new(bind: SocketAddr, interval_ms: u64) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind)
            .await
            .context(format!("binding telemetry socket {}", bind))?;
        Ok(Arc::new(Self {
            socket,
            controllers: Mutex::new([None; MAX_CONTROLLERS]),
            interval_ms,
            started: Instant::now(),
        }))
    }

    fn controllers(&self) -> MutexGuard<'_, [Option<Controller>; MAX_CONTROLLERS]> {
        self.controllers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns slot index of the controller.
    pub fn add_controller(&self, addr: SocketAddr) -> Result<usize> {
        let mut controllers = self.controllers();
        let (index, slot) = controllers
            .iter_mut()
            .enumerate()
            .find(|(_, c)| c.is_none())
            .context("telemetry controller table full")?;
        *slot = Some(Controller {
            addr,
            last_report_ms: None,
        });
        log::info!("telemetry controller [{}] {}", index, addr);
        Ok(index)
    }

    pub fn remove_controller(&self, index: usize) {
        if let Some(slot) = self.controllers().get_mut(index) {
            if slot.take().is_some() {
                log::info!("telemetry controller [{}] removed", index);
            }
        }
    }

    pub fn controller_count(&self) -> usize {
        self.controllers().iter().flatten().count()
    }

    /// Send report to all controllers outside their throttle window.
    /// Returns number of controllers reached.
    pub fn report(&self, path: &AttributePath, value: AttributeValue) -> usize {
        let now = self.started.elapsed().as_millis() as u64;
        let line = match format_report(path, value, now) {
            Ok(l) => l,
            Err(e) => {
                log::error!("can't format telemetry report: {:#}", e);
                return 0;
            }
        };
        let mut sent = 0;
        for c in self.controllers().iter_mut().flatten() {
            if self.interval_ms > 0
                && c.last_report_ms
                    .is_some_and(|last| now.saturating_sub(last) < self.interval_ms)
            {
                continue;
            }
            match self.socket.try_send_to(line.as_bytes(), c.addr) {
                Ok(_) => {
                    c.last_report_ms = Some(now);
                    sent += 1;
                }
                Err(e) => log::warn!("telemetry send to {} failed: {}", c.addr, e),
            }
        }
        if sent > 0 {
            log::trace!("telemetry {} sent to {} controller(s)", path, sent);
        }
        sent
    }

    /// Register as store subscriber. Returns subscriber id.
    pub fn attach(self: &Arc<Self>, store: &AttributeStore) -> Result<u32> {
        let reporter = self.clone();
        store.subscribe(Arc::new(move |path, value| {
            reporter.report(&path, value);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusters::{self, on_off, temperature};
    use std::time::Duration;

    #[test]
    fn report_format() {
        let line = format_report(&on_off::path(), AttributeValue::Bool(true), 1234).unwrap();
        assert_eq!(
            line,
            "{\"type\":\"attribute-report\",\"endpoint\":1,\"cluster\":\"0x0006\",\"attribute\":\"0x0000\",\"value\":true,\"timestamp\":1234}\n"
        );
        let line = format_report(&temperature::measured_value_path(), AttributeValue::I16(-250), 0).unwrap();
        assert!(line.contains("\"cluster\":\"0x0402\""));
        assert!(line.contains("\"value\":-250"));
    }

    async fn recv_line(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 512];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    #[tokio::test]
    async fn store_changes_reach_controllers() {
        let dashboard = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reporter = TelemetryReporter::new("127.0.0.1:0".parse().unwrap(), 0)
            .await
            .unwrap();
        reporter.add_controller(dashboard.local_addr().unwrap()).unwrap();
        for _ in 1..MAX_CONTROLLERS {
            reporter.add_controller("127.0.0.1:9".parse().unwrap()).unwrap();
        }
        assert!(reporter.add_controller("127.0.0.1:9".parse().unwrap()).is_err());
        reporter.remove_controller(3);
        assert_eq!(reporter.controller_count(), MAX_CONTROLLERS - 1);

        let store = AttributeStore::new();
        clusters::register_defaults(&store).unwrap();
        reporter.attach(&store).unwrap();
        store.update(on_off::path(), AttributeValue::Bool(true)).unwrap();

        let line = recv_line(&dashboard).await;
        let v: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(v["type"], "attribute-report");
        assert_eq!(v["endpoint"], 1);
        assert_eq!(v["value"], true);
        assert!(line.ends_with('\n'));
    }

    #[tokio::test]
    async fn throttled() {
        let dashboard = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reporter = TelemetryReporter::new("127.0.0.1:0".parse().unwrap(), 60_000)
            .await
            .unwrap();
        reporter.add_controller(dashboard.local_addr().unwrap()).unwrap();
        assert_eq!(reporter.report(&on_off::path(), AttributeValue::Bool(true)), 1);
        assert_eq!(reporter.report(&on_off::path(), AttributeValue::Bool(false)), 0);
        assert!(recv_line(&dashboard).await.contains("\"value\":true"));
    }
}
