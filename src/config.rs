//! JSON configuration describing the inverters to monitor.
//!
//! A config file lists systems, each with one or more inverters; standalone
//! inverters may also appear at the top level. Only the shape is handled
//! here; connecting and storage are the caller's business.
//!
//! ```json
//! {
//!     "systems": [
//!         {
//!             "name": "home",
//!             "inverters": [
//!                 {
//!                     "bluetooth": "00:80:25:2C:11:B2",
//!                     "serial": 2130012345,
//!                     "start-time": "2013-01-01"
//!                 }
//!             ]
//!         }
//!     ]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::{SmaError, util};

fn default_password() -> String {
    "0000".to_string()
}

/// One inverter's connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InverterConfig {
    /// Bluetooth address of the inverter, colon-separated hex.
    pub bluetooth: String,
    /// Device serial number, the key samples are stored under.
    pub serial: u32,
    #[serde(default)]
    pub name: Option<String>,
    /// Earliest time worth downloading, e.g. the installation date.
    #[serde(rename = "start-time", default)]
    pub start_time: Option<String>,
    /// Device user password.
    #[serde(default = "default_password")]
    pub password: String,
}

impl InverterConfig {
    /// The configured start time as a Unix timestamp.
    pub fn start_timestamp(&self) -> Result<Option<u32>, SmaError> {
        self.start_time
            .as_deref()
            .map(util::parse_time)
            .transpose()
    }

    /// Display name, falling back to the serial number.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("inverter-{}", self.serial),
        }
    }
}

/// A group of inverters forming one installation.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inverters: Vec<InverterConfig>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
    /// Standalone inverters outside any system block.
    #[serde(default)]
    pub inverters: Vec<InverterConfig>,
}

impl Config {
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, SmaError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SmaError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Every configured inverter, system members first.
    pub fn all_inverters(&self) -> impl Iterator<Item = &InverterConfig> {
        self.systems
            .iter()
            .flat_map(|s| s.inverters.iter())
            .chain(self.inverters.iter())
    }
}
