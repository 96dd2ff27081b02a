//! Layered configuration: built-in defaults, an optional user file and `ALTLINK_` environment
//! variables, merged in that order.

use std::{path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::probe::ConnectionType;

/// The highest SWJ clock the driver will request from a probe.
pub const MAX_CLOCK_HZ: u32 = 10_000_000;

/// A stack of configuration sources, extracted into a [`Config`] on demand.
#[derive(Debug, Clone)]
pub struct Configs {
    figment: Figment,
}

/// Everything the driver can be configured with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub probe: ProbeFilter,
    pub connection: Connection,
    pub transfer: Transfer,
    pub flags: Flags,
    pub timeouts: Timeouts,
    pub log_level: Option<String>,
}

/// Selects which attached probe to open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeFilter {
    /// Hexadecimal USB vendor id.
    pub vid: Option<String>,
    /// Hexadecimal USB product id.
    pub pid: Option<String>,
    pub serial: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Connection {
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub clock_hz: u32,
}

/// Parameters of the DAP_TransferConfigure and DAP_SWD_Configure commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Transfer {
    pub idle_cycles: u8,
    pub wait_retry: u16,
    pub match_retry: u16,
    pub swd_configure: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Flags {
    /// Request debug power-up before the AP scan.
    pub auto_power_up_debug: bool,
    /// Turn on DEMCR.TRCENA during the scan so the DWT shows up.
    pub auto_enable_dwt: bool,
}

/// Timeouts in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    pub usb: u64,
    pub power_up: u64,
    pub operation: u64,
}

impl Timeouts {
    pub fn usb(&self) -> Duration {
        Duration::from_millis(self.usb)
    }

    pub fn power_up(&self) -> Duration {
        Duration::from_millis(self.power_up)
    }

    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation)
    }
}

impl Connection {
    /// The configured clock, limited to [`MAX_CLOCK_HZ`].
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz.min(MAX_CLOCK_HZ)
    }
}

impl ProbeFilter {
    /// Whether a probe with the given identity passes this filter.
    ///
    /// Unparseable ids never match.
    pub fn matches(&self, vendor_id: u16, product_id: u16, serial: Option<&str>) -> bool {
        let id_matches = |filter: &Option<String>, id: u16| match filter {
            Some(text) => u16::from_str_radix(text.trim_start_matches("0x"), 16) == Ok(id),
            None => true,
        };
        let serial_matches = match &self.serial {
            Some(wanted) => serial == Some(wanted.as_str()),
            None => true,
        };

        id_matches(&self.vid, vendor_id) && id_matches(&self.pid, product_id) && serial_matches
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            probe: ProbeFilter::default(),
            connection: Connection {
                connection_type: ConnectionType::SwjSwd,
                clock_hz: 100_000,
            },
            transfer: Transfer {
                idle_cycles: 0,
                wait_retry: 64,
                match_retry: 0,
                swd_configure: 0,
            },
            flags: Flags {
                auto_power_up_debug: true,
                auto_enable_dwt: true,
            },
            timeouts: Timeouts {
                usb: 1000,
                power_up: 1000,
                operation: 250,
            },
            log_level: None,
        }
    }
}

impl Default for Configs {
    fn default() -> Self {
        Self::new()
    }
}

impl Configs {
    /// Built-in defaults.
    ///
    /// `ALTLINK_` environment variables are applied on top of every other source when the
    /// config is extracted. Nested keys use a double underscore, e.g.
    /// `ALTLINK_CONNECTION__CLOCK_HZ=1000000`.
    pub fn new() -> Configs {
        Configs {
            figment: Figment::new().merge(Toml::string(include_str!("default.toml"))),
        }
    }

    /// Merge a user configuration file. The format is chosen by extension, missing files are
    /// skipped.
    pub fn merge(&mut self, conf_file: &Path) -> Result<(), crate::Error> {
        let original = self.figment.clone();
        self.figment = match conf_file.extension().and_then(|e| e.to_str()) {
            Some("toml") => original.merge(Toml::file(conf_file)),
            Some("json") => original.merge(Json::file(conf_file)),
            _ => {
                return Err(crate::Error::Config(format!(
                    "File format of {} not recognized from extension (supported: .toml, .json)",
                    conf_file.display()
                )))
            }
        };
        Ok(())
    }

    /// Merge a TOML snippet on top of everything else.
    pub fn merge_toml(&mut self, toml: &str) {
        self.figment = self.figment.clone().merge(Toml::string(toml));
    }

    pub fn extract(&self) -> Result<Config, crate::Error> {
        let figment = self
            .figment
            .clone()
            .merge(Env::prefixed("ALTLINK_").split("__"));
        figment.extract().map_err(|errors| {
            // Join all the figment errors into a multiline string.
            crate::Error::Config(
                errors
                    .into_iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<String>>()
                    .join("\n"),
            )
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_builtin_file() {
        let config = Configs::new().extract().unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn snippet_overrides_defaults() {
        let mut configs = Configs::new();
        configs.merge_toml(
            r#"
            [connection]
            type = "JTAG"
            clock_hz = 50000000
            "#,
        );

        let config = configs.extract().unwrap();

        assert_eq!(config.connection.connection_type, ConnectionType::Jtag);
        assert_eq!(config.connection.clock_hz(), MAX_CLOCK_HZ);
        assert_eq!(config.transfer.wait_retry, 64);
    }

    #[test]
    fn unknown_items_fail() {
        let mut configs = Configs::new();
        configs.merge_toml(
            r#"
            [flags]
            bogus_invalid_item = true
            "#,
        );

        assert!(matches!(configs.extract(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn file_name_patterns() {
        // Missing files are skipped, unknown extensions are not.
        Configs::new()
            .merge(Path::new("nonexistent-file.json"))
            .unwrap();
        Configs::new()
            .merge(Path::new("nonexistent-file.ini"))
            .unwrap_err();
    }

    #[test]
    fn probe_filter() {
        let filter = ProbeFilter {
            vid: Some("0d28".into()),
            pid: None,
            serial: Some("A1".into()),
        };

        assert!(filter.matches(0x0D28, 0x0204, Some("A1")));
        assert!(!filter.matches(0x0D28, 0x0204, Some("B2")));
        assert!(!filter.matches(0x1366, 0x0204, Some("A1")));
    }
}
