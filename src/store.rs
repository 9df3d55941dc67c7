//! File-backed device configuration store.
//!
//! Owns the device record lifecycle: initial load (defaults → persisted
//! registration file → environment overrides → derived system UUID),
//! forced reload, incremental update from an inbound registration payload,
//! and persistence back to disk. The instance list is cached together with
//! the modification time of the file it was last validated against, so
//! out-of-band edits to the registration file are picked up without
//! re-reading it on every request.
//!
//! All state lives behind one mutex; handlers share the store via `Arc`
//! and run its blocking file I/O off the async request path.

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use thiserror::Error;

use crate::device::{DeviceRecord, DEFAULT_ENDPOINT_PORT};
use crate::extract;
use crate::sysuuid::{SystemUuid, UuidSource};

/// Identity fields accepted from the nested `device` object of a
/// registration payload and from the persisted registration file.
const REGISTERED_FIELDS: &[&str] = &[
    "version",
    "serial_number",
    "model_type",
    "device_type",
    "hardware_revision",
    "production_date",
    "warranty_period",
    "build_date",
    "mode",
];

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("payload has no device object")]
    MissingDeviceObject,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("no writable registration file path")]
    NoWritablePath,
    #[error("failed to write registration file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Default)]
struct StoreState {
    loaded: bool,
    record: DeviceRecord,
    /// Cached instance list plus the mtime it was validated against.
    instances: Vec<String>,
    last_mtime: Option<SystemTime>,
    cached_uuid: Option<String>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new(vec![
            PathBuf::from("./device_registered.json"),
            PathBuf::from("/etc/device_registered.json"),
        ])
    }
}

/// Process-wide device configuration store.
///
/// Candidate registration file paths are tried in order for load, reload
/// and persist alike; the first one that opens wins, so all three agree on
/// which file is "the" registration file.
pub struct DeviceStore {
    paths: Vec<PathBuf>,
    uuid: Box<dyn UuidSource>,
    state: Mutex<StoreState>,
}

impl DeviceStore {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self::with_uuid_source(paths, Box::new(SystemUuid::default()))
    }

    pub fn with_uuid_source(paths: Vec<PathBuf>, uuid: Box<dyn UuidSource>) -> Self {
        Self {
            paths,
            uuid,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Load the device record if it has not been loaded yet. No-op once
    /// loaded; `reload` bypasses this explicitly.
    pub fn load(&self) {
        let mut state = self.state.lock().unwrap();
        self.load_locked(&mut state);
    }

    /// Force a full re-derivation of the record, then re-read the instance
    /// list from the persisted file so subsequent reads reflect exactly
    /// what is on disk. The UUID cache is kept: the host does not change.
    pub fn reload(&self) {
        let mut state = self.state.lock().unwrap();
        state.loaded = false;
        state.instances.clear();
        state.last_mtime = None;
        self.load_locked(&mut state);

        if let Some((path, content)) = self.read_registration_file() {
            let instances = extract::string_array_field(&content, "instances");
            if !instances.is_empty() {
                state.instances = instances;
            }
            state.last_mtime = file_mtime(&path);
        }
    }

    /// Current device record (loads on first use).
    pub fn record(&self) -> DeviceRecord {
        let mut state = self.state.lock().unwrap();
        self.load_locked(&mut state);
        state.record.clone()
    }

    /// Configured endpoint port, falling back to the default when empty.
    pub fn endpoint_port(&self) -> String {
        let mut state = self.state.lock().unwrap();
        self.load_locked(&mut state);
        if state.record.endpoint_port.is_empty() {
            DEFAULT_ENDPOINT_PORT.to_string()
        } else {
            state.record.endpoint_port.clone()
        }
    }

    /// Apply a registration payload to the in-memory record.
    ///
    /// Identity fields come from the nested `device` object; `endpoint_port`
    /// and `instances` are read from the payload top level (deployment
    /// parameters, not identity fields). Empty incoming values leave the
    /// current value unchanged. Fails without mutating anything when the
    /// `device` object is missing.
    pub fn update_from_json(&self, payload: &str) -> Result<(), UpdateError> {
        let mut state = self.state.lock().unwrap();
        self.load_locked(&mut state);

        let device = extract::object_field(payload, "device");
        if device.is_empty() {
            tracing::warn!("registration payload rejected: no device object found");
            return Err(UpdateError::MissingDeviceObject);
        }

        for key in REGISTERED_FIELDS {
            set_from_json(&mut state.record, key, &device);
        }

        let port = extract::string_field(payload, "endpoint_port");
        if !port.is_empty() {
            state.record.endpoint_port = port;
        }

        let instances = extract::string_array_field(payload, "instances");
        if instances.is_empty() {
            tracing::debug!("registration payload carried no instances, keeping current list");
        } else {
            tracing::debug!(count = instances.len(), "instance list replaced from payload");
            state.instances = instances;
        }

        Ok(())
    }

    /// Write the record plus the current instance list to the first
    /// candidate path that accepts the write. On success the mtime marker
    /// is refreshed from the written file so the instance cache stays
    /// consistent with what was just persisted.
    pub fn persist(&self) -> Result<PathBuf, PersistError> {
        let mut state = self.state.lock().unwrap();
        self.load_locked(&mut state);

        // A non-empty in-memory list is the value being registered right
        // now; an empty one means this cycle never received instances, so
        // re-read rather than truncate what was previously persisted.
        let instances = if state.instances.is_empty() {
            self.instances_locked(&mut state)
        } else {
            state.instances.clone()
        };

        let body = render_registration(&state.record, &instances);

        for path in &self.paths {
            let mut file = match File::create(path) {
                Ok(file) => file,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "registration path not writable, trying next");
                    continue;
                }
            };
            file.write_all(body.as_bytes())?;
            file.flush()?;
            drop(file);

            state.last_mtime = file_mtime(path);
            tracing::info!(path = %path.display(), "device registration saved");
            return Ok(path.clone());
        }

        tracing::error!("no registration file path accepted the write");
        Err(PersistError::NoWritablePath)
    }

    /// Current instance list, consulting the filesystem only when needed.
    ///
    /// A changed file mtime drops the cached list first, so edits made
    /// outside this process are observed. Falls back to the
    /// `DEVICE_INSTANCES` environment variable, then to `[system_uuid]`.
    pub fn instances(&self) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        self.instances_locked(&mut state)
    }

    fn instances_locked(&self, state: &mut StoreState) -> Vec<String> {
        if let Some((path, mtime)) = self.stat_registration_file() {
            if state.last_mtime != Some(mtime) {
                if !state.instances.is_empty() {
                    tracing::debug!(path = %path.display(), "registration file changed on disk, instance cache dropped");
                }
                state.instances.clear();
                state.last_mtime = Some(mtime);
            }
        }

        if !state.instances.is_empty() {
            return state.instances.clone();
        }

        let mut instances = Vec::new();
        if let Some((path, content)) = self.read_registration_file() {
            instances = extract::string_array_field(&content, "instances");
            state.last_mtime = file_mtime(&path);
        }

        if instances.is_empty() {
            if let Ok(raw) = env::var("DEVICE_INSTANCES") {
                instances = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if !instances.is_empty() {
                    tracing::debug!(count = instances.len(), "instance list taken from DEVICE_INSTANCES");
                }
            }
        }

        if instances.is_empty() {
            tracing::debug!("no instance source configured, defaulting to system UUID");
            instances.push(self.uuid_locked(state));
        }

        state.instances = instances.clone();
        instances
    }

    fn load_locked(&self, state: &mut StoreState) {
        if state.loaded {
            return;
        }

        let mut record = DeviceRecord::default();

        // Persisted registration file beats defaults
        if let Some((path, content)) = self.read_registration_file() {
            tracing::debug!(path = %path.display(), "loading device record from registration file");
            for key in REGISTERED_FIELDS {
                set_from_json(&mut record, key, &content);
            }
            let port = extract::string_field(&content, "endpoint_port");
            if !port.is_empty() {
                record.endpoint_port = port;
            }
            let instances = extract::string_array_field(&content, "instances");
            if !instances.is_empty() {
                state.instances = instances;
            }
        } else {
            tracing::debug!("no registration file found, starting from defaults");
        }

        // Environment beats the file for everything but endpoint_port
        apply_env_overrides(&mut record);

        record.system_uuid = self.uuid_locked(state);

        state.record = record;
        state.loaded = true;
    }

    fn uuid_locked(&self, state: &mut StoreState) -> String {
        if let Some(uuid) = &state.cached_uuid {
            return uuid.clone();
        }
        let uuid = self.uuid.system_uuid();
        state.cached_uuid = Some(uuid.clone());
        uuid
    }

    /// First candidate path that opens, with its content.
    fn read_registration_file(&self) -> Option<(PathBuf, String)> {
        for path in &self.paths {
            match fs::read_to_string(path) {
                Ok(content) => return Some((path.clone(), content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "registration file unreadable");
                }
            }
        }
        None
    }

    /// First candidate path that exists, with its mtime.
    fn stat_registration_file(&self) -> Option<(PathBuf, SystemTime)> {
        for path in &self.paths {
            if let Some(mtime) = file_mtime(path) {
                return Some((path.clone(), mtime));
            }
        }
        None
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Overwrite a registered field from a JSON blob when present non-empty.
fn set_from_json(record: &mut DeviceRecord, key: &str, json: &str) {
    let value = extract::string_field(json, key);
    if value.is_empty() {
        return;
    }
    match key {
        "version" => record.version = value,
        "serial_number" => record.serial_number = value,
        "model_type" => record.model_type = value,
        "device_type" => record.device_type = value,
        "hardware_revision" => record.hardware_revision = value,
        "production_date" => record.production_date = value,
        "warranty_period" => record.warranty_period = value,
        "build_date" => record.build_date = value,
        "mode" => record.mode = value,
        _ => {}
    }
}

fn apply_env_overrides(record: &mut DeviceRecord) {
    override_from_env(&mut record.version, "DEVICE_VERSION");
    override_from_env(&mut record.serial_number, "DEVICE_SERIAL_NUMBER");
    override_from_env(&mut record.model_type, "DEVICE_MODEL_TYPE");
    override_from_env(&mut record.firmware_version, "DEVICE_FIRMWARE_VERSION");
    override_from_env(&mut record.hardware_id, "DEVICE_HARDWARE_ID");
    override_from_env(&mut record.manufacturer, "DEVICE_MANUFACTURER");
    override_from_env(&mut record.device_type, "DEVICE_TYPE");
    override_from_env(&mut record.hardware_revision, "DEVICE_HARDWARE_REVISION");
    override_from_env(&mut record.production_date, "DEVICE_PRODUCTION_DATE");
    override_from_env(&mut record.warranty_period, "DEVICE_WARRANTY_PERIOD");
    override_from_env(&mut record.support_contact, "DEVICE_SUPPORT_CONTACT");
    override_from_env(&mut record.documentation_url, "DEVICE_DOCUMENTATION_URL");
    override_from_env(&mut record.mode, "DEVICE_MODE");

    // Weaker than the file on purpose: the env port only applies when the
    // field is still empty after file load. Deployment tooling depends on
    // this precedence.
    if record.endpoint_port.is_empty() {
        override_from_env(&mut record.endpoint_port, "DEVICE_ENDPOINT_PORT");
    }
}

fn override_from_env(field: &mut String, var: &str) {
    match env::var(var) {
        Ok(value) if !value.is_empty() => *field = value,
        _ => {}
    }
}

/// Render the registration file body: the registered fields plus the
/// instance list, every string passed through the JSON escape.
fn render_registration(record: &DeviceRecord, instances: &[String]) -> String {
    let mut out = String::new();
    out.push_str("{\n");
    for (key, value) in [
        ("version", &record.version),
        ("serial_number", &record.serial_number),
        ("model_type", &record.model_type),
        ("device_type", &record.device_type),
        ("hardware_revision", &record.hardware_revision),
        ("production_date", &record.production_date),
        ("warranty_period", &record.warranty_period),
        ("build_date", &record.build_date),
        ("mode", &record.mode),
        ("endpoint_port", &record.endpoint_port),
    ] {
        out.push_str(&format!("  \"{}\": \"{}\",\n", key, extract::escape_json(value)));
    }
    out.push_str("  \"instances\": [\n");
    for (i, instance) in instances.iter().enumerate() {
        out.push_str(&format!("    \"{}\"", extract::escape_json(instance)));
        if i + 1 < instances.len() {
            out.push(',');
        }
        out.push('\n');
    }
    out.push_str("  ]\n}\n");
    out
}
