//! System UUID derivation.
//!
//! Tries the cheap sources first (machine-id file, DMI product UUID) and
//! only shells out to `dmidecode` when both are unusable. The store caches
//! the result, so each source is consulted at most once per process.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Returned when every source fails to produce a usable UUID.
pub const FALLBACK_UUID: &str = "0fca8dd9-68be-26d9-3cf3-aa4625bac670";

const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// Source of the host system UUID. The store memoizes whatever this
/// returns, so implementations are expected to be called at most once.
pub trait UuidSource: Send + Sync {
    fn system_uuid(&self) -> String;
}

/// Production source: machine-id file, then DMI product UUID, then the
/// `dmidecode` command, then [`FALLBACK_UUID`].
pub struct SystemUuid {
    machine_id_path: PathBuf,
    dmi_uuid_path: PathBuf,
    command: String,
    command_timeout: Duration,
}

impl Default for SystemUuid {
    fn default() -> Self {
        Self {
            machine_id_path: PathBuf::from("/etc/machine-id"),
            dmi_uuid_path: PathBuf::from("/sys/class/dmi/id/product_uuid"),
            command: "dmidecode".to_string(),
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl SystemUuid {
    /// Source with custom file paths and command, for tests.
    pub fn with_sources(
        machine_id_path: impl Into<PathBuf>,
        dmi_uuid_path: impl Into<PathBuf>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            machine_id_path: machine_id_path.into(),
            dmi_uuid_path: dmi_uuid_path.into(),
            command: command.into(),
            command_timeout: Duration::from_secs(5),
        }
    }

    fn from_machine_id(&self) -> Option<String> {
        let machine_id = first_line(&self.machine_id_path)?;
        if machine_id.is_empty() {
            return None;
        }
        if machine_id.len() >= 32 && machine_id.is_ascii() {
            // Reformat 32 hex chars into canonical 8-4-4-4-12 groups
            return Some(format!(
                "{}-{}-{}-{}-{}",
                &machine_id[..8],
                &machine_id[8..12],
                &machine_id[12..16],
                &machine_id[16..20],
                &machine_id[20..32]
            ));
        }
        Some(machine_id)
    }

    fn from_dmi(&self) -> Option<String> {
        let uuid = first_line(&self.dmi_uuid_path)?;
        if uuid.is_empty() || uuid == NIL_UUID {
            return None;
        }
        Some(uuid)
    }

    fn from_command(&self) -> Option<String> {
        let mut child = Command::new(&self.command)
            .args(["-s", "system-uuid"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()
            .ok()?;

        // dmidecode is the only source that can stall, so bound it
        let deadline = Instant::now() + self.command_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(command = %self.command, "uuid command timed out, killing it");
                        let _ = child.kill();
                        let _ = child.wait();
                        return None;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(_) => return None,
            }
        }

        let mut output = String::new();
        child.stdout.take()?.read_to_string(&mut output).ok()?;
        let uuid = output.lines().next().unwrap_or("").trim().to_string();
        if uuid.is_empty() || uuid == "Not Specified" || uuid == NIL_UUID {
            return None;
        }
        Some(uuid)
    }
}

impl UuidSource for SystemUuid {
    fn system_uuid(&self) -> String {
        if let Some(uuid) = self.from_machine_id() {
            return uuid;
        }
        tracing::debug!(path = %self.machine_id_path.display(), "machine-id unavailable, trying DMI");
        if let Some(uuid) = self.from_dmi() {
            return uuid;
        }
        tracing::debug!(path = %self.dmi_uuid_path.display(), "DMI product UUID unavailable, trying command");
        if let Some(uuid) = self.from_command() {
            return uuid;
        }
        tracing::warn!("no system UUID source available, using fallback constant");
        FALLBACK_UUID.to_string()
    }
}

fn first_line(path: &std::path::Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    Some(content.lines().next().unwrap_or("").trim().to_string())
}
