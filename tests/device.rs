use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use matd::attributes::{AttributePath, AttributeStore, AttributeValue};
use matd::bridge::{self, SensorReading};
use matd::clusters::{self, network_commissioning, on_off, temperature};
use matd::commissioning::{CommissioningState, PASE_SESSION_ID};
use matd::config::DeviceConfig;
use matd::controller::{Commissioner, Controller};
use matd::device::{self, Device};
use matd::interaction::StatusCode;
use matd::storage::{FileStorage, MemoryStorage, Storage};
use matd::transport::{PortKind, Transport};

fn localhost() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn temp_dir(name: &str) -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("matd_it_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&p);
    p.to_string_lossy().to_string()
}

async fn wait_for(store: &AttributeStore, path: &AttributePath, value: AttributeValue) {
    for _ in 0..200 {
        if store.get(path) == Some(value) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never became {:?}", path, value);
}

#[test]
fn pin_drives_commissioning_to_completion() {
    let config = DeviceConfig::default();
    let mut device =
        Device::new(&config, Arc::new(MemoryStorage::new()), AttributeStore::new()).unwrap();
    assert_eq!(device.commissioning().state(), CommissioningState::PaseStarted);

    let peer = "127.0.0.1:41000".parse().unwrap();
    let mut c = Commissioner::new(b"20202021").unwrap();
    let req = c.pbkdf_request().unwrap();
    let resp = device.process_datagram(PortKind::Commissioning, &req, peer).unwrap();
    let req = c.pake1(&resp).unwrap();
    let resp = device.process_datagram(PortKind::Commissioning, &req, peer).unwrap();
    let req = c.pake3(&resp).unwrap();
    let resp = device.process_datagram(PortKind::Commissioning, &req, peer).unwrap();
    c.finish(&resp).unwrap();

    assert_eq!(device.commissioning().state(), CommissioningState::Commissioned);
    assert!(device.sessions().is_active(PASE_SESSION_ID));
    assert_eq!(device.sessions().active_count(), 1);
}

#[tokio::test]
async fn udp_commission_read_and_subscribe() {
    let config = DeviceConfig {
        bind_address: localhost(),
        ..Default::default()
    };
    let store = AttributeStore::new();
    let device = Device::new(&config, Arc::new(MemoryStorage::new()), store.clone()).unwrap();
    let transport = Transport::new(localhost(), 0, 0).await.unwrap();
    let commissioning = transport.local_addr(PortKind::Commissioning).unwrap();
    let operational = transport.local_addr(PortKind::Operational).unwrap();
    let (readings, receiver) = bridge::channel();
    let token = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn(device::run(device, transport, receiver, token.clone()));

    let mut controller = Controller::new("127.0.0.1:0", commissioning, operational, b"20202021")
        .await
        .unwrap();
    controller.commission().await.unwrap();

    assert!(readings.send(SensorReading {
        flame_detected: true,
        fan_speed: 55,
        temperature: 70,
        error_code: 0,
        valid: true,
    }));
    wait_for(&store, &temperature::measured_value_path(), AttributeValue::I16(7000)).await;

    let report = controller
        .read(&[
            temperature::measured_value_path(),
            AttributePath::new(1, 0x9999, 0),
        ])
        .await
        .unwrap();
    assert_eq!(report.get_bool(&[4]), Some(true));
    let reports = report.get_item(&[1]).unwrap().children();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].get_signed(&[1, 2]), Some(7000));
    assert_eq!(
        reports[1].get_u8(&[0, 1, 0]),
        Some(StatusCode::UnsupportedCluster as u8)
    );

    let subscription_id = controller.subscribe(&[on_off::path()], 0, 60).await.unwrap();
    assert!(readings.send(SensorReading {
        flame_detected: false,
        fan_speed: 0,
        temperature: 70,
        error_code: 0,
        valid: true,
    }));
    let report = controller.recv_report(Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.get_u32(&[0]), Some(subscription_id));
    let r = &report.get_item(&[1]).unwrap().children()[0];
    assert_eq!(r.get_bool(&[1, 2]), Some(false));

    token.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn wifi_credentials_are_persisted() {
    let dir = temp_dir("wifi");
    let storage = Arc::new(FileStorage::new(&dir).unwrap());
    let device = Device::new(&DeviceConfig::default(), storage.clone(), AttributeStore::new()).unwrap();
    let transport = Transport::new(localhost(), 0, 0).await.unwrap();
    let commissioning = transport.local_addr(PortKind::Commissioning).unwrap();
    let operational = transport.local_addr(PortKind::Operational).unwrap();
    let (_readings, receiver) = bridge::channel();
    let token = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn(device::run(device, transport, receiver, token.clone()));

    let mut controller = Controller::new("127.0.0.1:0", commissioning, operational, b"20202021")
        .await
        .unwrap();
    controller.commission().await.unwrap();
    let resp = controller
        .invoke(
            clusters::ENDPOINT_ROOT,
            clusters::CLUSTER_ID_NETWORK_COMMISSIONING,
            network_commissioning::CMD_ID_ADD_OR_UPDATE_WIFI_NETWORK,
            &[(0, &b"home"[..]), (1, &b"secret"[..])],
        )
        .await
        .unwrap();
    let r = &resp.get_item(&[1]).unwrap().children()[0];
    assert_eq!(r.get_u8(&[0, 1, 0]), Some(0));

    let stored = storage
        .read(network_commissioning::WIFI_CREDENTIALS_STORAGE_KEY)
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&stored).unwrap();
    assert_eq!(json["ssid"], hex::encode(b"home"));

    token.cancel();
    handle.await.unwrap().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn fabrics_survive_restart() {
    let dir = temp_dir("fabrics");
    let storage = Arc::new(FileStorage::new(&dir).unwrap());
    {
        let mut device =
            Device::new(&DeviceConfig::default(), storage.clone(), AttributeStore::new()).unwrap();
        device
            .commissioning_mut()
            .complete(0x1000, 0xfff1, &[4; 65])
            .unwrap();
    }
    let device = Device::new(&DeviceConfig::default(), storage, AttributeStore::new()).unwrap();
    assert!(device.commissioning().is_commissioned());
    assert_eq!(device.commissioning().state(), CommissioningState::Commissioned);
    assert_eq!(
        device.commissioning().get_fabric(0x1000).unwrap().vendor_id,
        0xfff1
    );
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn discriminator_kept_across_restart() {
    let dir = temp_dir("discriminator");
    let first = {
        let storage = Arc::new(FileStorage::new(&dir).unwrap());
        let device = Device::new(&DeviceConfig::default(), storage, AttributeStore::new()).unwrap();
        assert!((0x0f00..=0x0fff).contains(&device.discriminator()));
        assert_eq!(device.commissioning().discriminator(), device.discriminator());
        device.discriminator()
    };
    let storage = Arc::new(FileStorage::new(&dir).unwrap());
    let device = Device::new(&DeviceConfig::default(), storage.clone(), AttributeStore::new()).unwrap();
    assert_eq!(device.discriminator(), first);

    let config = DeviceConfig {
        discriminator: Some(0x0123),
        ..Default::default()
    };
    let device = Device::new(&config, storage, AttributeStore::new()).unwrap();
    assert_eq!(device.discriminator(), 0x0123);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn mac_derived_pin_commissions() {
    let config = DeviceConfig {
        mac_address: Some("aa:bb:cc:dd:ee:ff".to_owned()),
        ..Default::default()
    };
    let mut device =
        Device::new(&config, Arc::new(MemoryStorage::new()), AttributeStore::new()).unwrap();
    assert_eq!(device.setup_pin(), "82474590");

    let peer = "127.0.0.1:41001".parse().unwrap();
    let mut c = Commissioner::new(b"82474590").unwrap();
    let req = c.pbkdf_request().unwrap();
    let resp = device.process_datagram(PortKind::Commissioning, &req, peer).unwrap();
    let req = c.pake1(&resp).unwrap();
    let resp = device.process_datagram(PortKind::Commissioning, &req, peer).unwrap();
    let req = c.pake3(&resp).unwrap();
    let resp = device.process_datagram(PortKind::Commissioning, &req, peer).unwrap();
    c.finish(&resp).unwrap();
    assert_eq!(device.commissioning().state(), CommissioningState::Commissioned);

    let config = DeviceConfig {
        discriminator: Some(0x1000),
        ..Default::default()
    };
    assert!(Device::new(&config, Arc::new(MemoryStorage::new()), AttributeStore::new()).is_err());
}
