//! Configuration consumed by the core.
//!
//! The host loads these from its own format; everything here is plain
//! serde-deserializable data. `DeviceConfig` is unique per modem,
//! `SharedConfig` may be inherited from a defaults section, and
//! `GlobalConfig` is process-wide.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tristate {
    #[default]
    None,
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallWaiting {
    Disallowed,
    Allowed,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStorage {
    #[default]
    Auto,
    Sm,
    Me,
    Mt,
    Sr,
}

impl MessageStorage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStorage::Auto => "AUTO",
            MessageStorage::Sm => "SM",
            MessageStorage::Me => "ME",
            MessageStorage::Mt => "MT",
            MessageStorage::Sr => "SR",
        }
    }
}

/// State a device should be brought to at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialState {
    Stopped,
    #[default]
    Started,
    Removed,
}

fn default_true() -> bool {
    true
}

/// Per-device unique settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub data_tty: String,
    #[serde(default)]
    pub audio_tty: Option<String>,
    #[serde(default)]
    pub imei: Option<String>,
    #[serde(default)]
    pub imsi: Option<String>,
    #[serde(default)]
    pub initial_state: InitialState,
}

/// Settings a device group may inherit.
#[derive(Debug, Clone, Deserialize)]
pub struct SharedConfig {
    #[serde(default = "default_true")]
    pub reset_modem: bool,
    #[serde(default)]
    pub call_waiting: CallWaiting,
    #[serde(default)]
    pub auto_delete_sms: bool,
    #[serde(default)]
    pub disable_sms: bool,
    /// Route SMS-DELIVER directly (`+CMT`) instead of store-and-notify
    /// (`+CMTI`). `None` keeps the modem default.
    #[serde(default)]
    pub msg_direct: Tristate,
    #[serde(default)]
    pub msg_storage: MessageStorage,
    /// `AT+CSMS` service value; negative skips the command.
    #[serde(default = "SharedConfig::default_msg_service")]
    pub msg_service: i32,
    /// Enable DTMF tone detection during initialization.
    #[serde(default)]
    pub dtmf: bool,
    /// Use vendor time queries instead of a bare `AT` ping.
    #[serde(default)]
    pub query_time: bool,
    /// Prefer `AT+QHUP` with a cause code over `AT+CHUP` on Quectel.
    #[serde(default)]
    pub qhup: bool,
    /// Enable `^DSCI` call notifications instead of `+QIND: "ccinfo"`.
    #[serde(default)]
    pub dsci: bool,
}

impl SharedConfig {
    fn default_msg_service() -> i32 {
        -1
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        SharedConfig {
            reset_modem: true,
            call_waiting: CallWaiting::default(),
            auto_delete_sms: false,
            disable_sms: false,
            msg_direct: Tristate::default(),
            msg_storage: MessageStorage::default(),
            msg_service: -1,
            dtmf: false,
            query_time: false,
            qhup: false,
            dsci: false,
        }
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Path of the SMS database; `:memory:` keeps it in RAM.
    #[serde(default = "GlobalConfig::default_smsdb_path")]
    pub smsdb_path: String,
    /// Seconds an incomplete multipart message or an unacknowledged
    /// outbound report is retained.
    #[serde(default = "GlobalConfig::default_csms_ttl")]
    pub csms_ttl_seconds: u32,
    #[serde(default = "GlobalConfig::default_discovery_interval")]
    pub discovery_interval_seconds: u32,
}

impl GlobalConfig {
    fn default_smsdb_path() -> String {
        ":memory:".to_string()
    }

    fn default_csms_ttl() -> u32 {
        600
    }

    fn default_discovery_interval() -> u32 {
        60
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            smsdb_path: Self::default_smsdb_path(),
            csms_ttl_seconds: Self::default_csms_ttl(),
            discovery_interval_seconds: Self::default_discovery_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_defaults() {
        let c = SharedConfig::default();
        assert!(c.reset_modem);
        assert_eq!(c.call_waiting, CallWaiting::Auto);
        assert_eq!(c.msg_service, -1);
        assert!(!c.auto_delete_sms);
    }

    #[test]
    fn global_defaults() {
        let g = GlobalConfig::default();
        assert_eq!(g.smsdb_path, ":memory:");
        assert_eq!(g.csms_ttl_seconds, 600);
    }
}
