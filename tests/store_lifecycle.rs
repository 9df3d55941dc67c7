//! End-to-end lifecycle tests for the device configuration store:
//! update → persist → reload round-trips against a real registration file,
//! and instance cache invalidation when the file changes out of band.

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use device_agent::store::DeviceStore;
use device_agent::sysuuid::UuidSource;

struct FixedUuid(&'static str);

impl UuidSource for FixedUuid {
    fn system_uuid(&self) -> String {
        self.0.to_string()
    }
}

// The store reads DEVICE_* environment variables during load; keep these
// tests serialized and start each one from a clean environment.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_device_env() {
    for var in [
        "DEVICE_VERSION",
        "DEVICE_SERIAL_NUMBER",
        "DEVICE_MODEL_TYPE",
        "DEVICE_FIRMWARE_VERSION",
        "DEVICE_HARDWARE_ID",
        "DEVICE_MANUFACTURER",
        "DEVICE_TYPE",
        "DEVICE_HARDWARE_REVISION",
        "DEVICE_PRODUCTION_DATE",
        "DEVICE_WARRANTY_PERIOD",
        "DEVICE_SUPPORT_CONTACT",
        "DEVICE_DOCUMENTATION_URL",
        "DEVICE_MODE",
        "DEVICE_ENDPOINT_PORT",
        "DEVICE_INSTANCES",
    ] {
        std::env::remove_var(var);
    }
}

fn store_in(dir: &Path) -> DeviceStore {
    DeviceStore::with_uuid_source(
        vec![dir.join("device_registered.json")],
        Box::new(FixedUuid("fixed-uuid-0001")),
    )
}

#[test]
fn test_defaults_when_nothing_configured() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_device_env();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    let record = store.record();
    assert_eq!(record.model_type, "GTR_PRO");
    assert_eq!(record.system_uuid, "fixed-uuid-0001");
    assert_eq!(store.instances(), vec!["fixed-uuid-0001"]);
}

#[test]
fn test_registration_roundtrip() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_device_env();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    store
        .update_from_json(
            r#"{"device": {"model_type": "X1"}, "endpoint_port": "9000", "instances": ["a", "b"]}"#,
        )
        .unwrap();
    store.persist().unwrap();
    store.reload();

    let record = store.record();
    assert_eq!(record.model_type, "X1");
    assert_eq!(record.endpoint_port, "9000");
    assert_eq!(store.endpoint_port(), "9000");
    assert_eq!(store.instances(), vec!["a", "b"]);

    // A fresh store against the same file sees the persisted values
    let fresh = store_in(dir.path());
    let record = fresh.record();
    assert_eq!(record.model_type, "X1");
    assert_eq!(record.endpoint_port, "9000");
    assert_eq!(fresh.instances(), vec!["a", "b"]);
}

#[test]
fn test_roundtrip_preserves_all_registered_fields() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_device_env();
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());

    store
        .update_from_json(
            r#"{
                "device": {
                    "version": "2.3.4",
                    "serial_number": "SN-42",
                    "model_type": "MT-9",
                    "device_type": "EDGE_BOX",
                    "hardware_revision": "REV_C",
                    "production_date": "2025-06-01",
                    "warranty_period": "36",
                    "build_date": "2025-06-02T00:00:00Z",
                    "mode": "cloud"
                },
                "endpoint_port": "4000",
                "instances": ["inst-1"]
            }"#,
        )
        .unwrap();
    store.persist().unwrap();

    let fresh = store_in(dir.path());
    let record = fresh.record();
    assert_eq!(record.version, "2.3.4");
    assert_eq!(record.serial_number, "SN-42");
    assert_eq!(record.model_type, "MT-9");
    assert_eq!(record.device_type, "EDGE_BOX");
    assert_eq!(record.hardware_revision, "REV_C");
    assert_eq!(record.production_date, "2025-06-01");
    assert_eq!(record.warranty_period, "36");
    assert_eq!(record.build_date, "2025-06-02T00:00:00Z");
    assert_eq!(record.mode, "cloud");
    assert_eq!(record.endpoint_port, "4000");
    assert_eq!(fresh.instances(), vec!["inst-1"]);
}

#[test]
fn test_instance_cache_invalidated_by_external_edit() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_device_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device_registered.json");
    let store = store_in(dir.path());

    store
        .update_from_json(r#"{"device": {}, "instances": ["old-1"]}"#)
        .unwrap();
    store.persist().unwrap();
    store.reload();
    assert_eq!(store.instances(), vec!["old-1"]);

    // Edit the file behind the store's back with an advanced timestamp
    fs::write(&path, r#"{"instances": ["new-1", "new-2"]}"#).unwrap();
    let file = fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(30))
        .unwrap();
    drop(file);

    assert_eq!(store.instances(), vec!["new-1", "new-2"]);
}

#[test]
fn test_persist_without_instances_keeps_file_instances() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_device_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device_registered.json");
    fs::write(&path, r#"{"instances": ["existing"]}"#).unwrap();

    // A write cycle that never received an explicit instance list must not
    // truncate what was previously persisted
    let fresh = store_in(dir.path());
    fresh.persist().unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("existing"));
}
