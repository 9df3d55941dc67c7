//! In-memory device identity/registration record.

use serde::Serialize;

/// Identity and registration fields reported by this device.
///
/// Every field carries a non-empty compiled-in default; configuration
/// sources only ever overwrite a field with a non-empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub version: String,
    pub serial_number: String,
    pub model_type: String,
    pub firmware_version: String,
    pub hardware_id: String,
    pub manufacturer: String,
    pub device_type: String,
    pub hardware_revision: String,
    pub production_date: String,
    pub warranty_period: String,
    pub support_contact: String,
    pub documentation_url: String,
    pub build_date: String,
    pub mode: String,
    pub system_uuid: String,
    /// Deployment parameter rather than an identity field; reported at the
    /// top level of responses, not inside the device object.
    #[serde(skip_serializing)]
    pub endpoint_port: String,
}

/// Fallback endpoint port, also used when the configured value is empty.
pub const DEFAULT_ENDPOINT_PORT: &str = "3546";

impl Default for DeviceRecord {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            serial_number: "X99EINTE2314".to_string(),
            model_type: "GTR_PRO".to_string(),
            firmware_version: "1.0.0".to_string(),
            hardware_id: "unknown".to_string(),
            manufacturer: "CVEDIX".to_string(),
            device_type: "AI_VISION_SYSTEM".to_string(),
            hardware_revision: "REV_A".to_string(),
            production_date: "2024-01-01".to_string(),
            warranty_period: "24".to_string(),
            support_contact: "support@cvedix.com".to_string(),
            documentation_url: "https://docs.cvedix.com".to_string(),
            build_date: build_date().to_string(),
            mode: "local".to_string(),
            system_uuid: String::new(),
            endpoint_port: DEFAULT_ENDPOINT_PORT.to_string(),
        }
    }
}

/// Compile timestamp injected by build.rs, RFC 3339 formatted.
pub fn build_date() -> &'static str {
    option_env!("BUILD_DATE").unwrap_or(env!("CARGO_PKG_VERSION"))
}
