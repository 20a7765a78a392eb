// SPDX-License-Identifier: GPL-3.0-only
//! User preferences
//!
//! Preferences live in a small TOML file that is re-read on every tick, so
//! edits reach the device within a second. Every key is resolved on its own:
//! a missing file, a parse error, a missing key, a wrong type or an
//! out-of-range value all fall back to that key's default and never affect
//! the other keys.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::protocols::encoder::{DEFAULT_BRIGHTNESS, DEFAULT_DATE_FORMAT, clamp_brightness};

pub const APP_NAME: &str = "x52pro-clockd";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "X52PRO_CLOCKD_CONFIG";

/// 12- or 24-hour display on the primary clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    TwelveHour,
    #[default]
    TwentyFourHour,
}

impl ClockMode {
    pub fn is_24_hour(self) -> bool {
        self == ClockMode::TwentyFourHour
    }
}

/// Fully resolved preferences, defaults already applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    /// Six-character date template such as `ddmmyy`
    pub date_format: String,
    pub clock_mode: ClockMode,
    /// MFD backlight, 0-128
    pub mfd_brightness: u16,
    /// Button LED brightness, 0-128
    pub led_brightness: u16,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            clock_mode: ClockMode::default(),
            mfd_brightness: DEFAULT_BRIGHTNESS,
            led_brightness: DEFAULT_BRIGHTNESS,
        }
    }
}

/// The file as written by the user, before validation
///
/// Values are kept as untyped TOML so a wrongly typed key cannot fail the
/// whole document.
#[derive(Debug, Default, Deserialize)]
struct RawPreferences {
    #[serde(rename = "DateFormat")]
    date_format: Option<toml::Value>,
    #[serde(rename = "ClockType")]
    clock_type: Option<toml::Value>,
    #[serde(rename = "MFDBrightness")]
    mfd_brightness: Option<toml::Value>,
    #[serde(rename = "LEDBrightness")]
    led_brightness: Option<toml::Value>,
}

impl RawPreferences {
    fn resolve(self) -> Preferences {
        let date_format = match self.date_format {
            Some(toml::Value::String(format)) if format.chars().count() == 6 => format,
            _ => DEFAULT_DATE_FORMAT.to_string(),
        };

        let clock_mode = match self.clock_type {
            Some(toml::Value::String(kind)) if kind == "12" => ClockMode::TwelveHour,
            Some(toml::Value::Integer(12)) => ClockMode::TwelveHour,
            _ => ClockMode::TwentyFourHour,
        };

        Preferences {
            date_format,
            clock_mode,
            mfd_brightness: brightness(self.mfd_brightness),
            led_brightness: brightness(self.led_brightness),
        }
    }
}

fn brightness(value: Option<toml::Value>) -> u16 {
    let raw = match value {
        Some(toml::Value::Integer(level)) => Some(level),
        _ => None,
    };
    clamp_brightness(raw, DEFAULT_BRIGHTNESS)
}

/// Parse preferences from TOML text
///
/// If the document as a whole does not parse, each line is parsed on its own
/// so a malformed value only costs its own key. For repeated keys the first
/// occurrence wins.
pub fn parse_preferences(text: &str) -> Preferences {
    match toml::from_str::<RawPreferences>(text) {
        Ok(raw) => raw.resolve(),
        Err(e) => {
            debug!("Preferences do not parse as a whole, reading them line by line: {}", e);
            salvage_lines(text).resolve()
        }
    }
}

fn salvage_lines(text: &str) -> RawPreferences {
    let mut table = toml::Table::new();
    for line in text.lines() {
        let Ok(entry) = toml::from_str::<toml::Table>(line) else {
            continue;
        };
        for (key, value) in entry {
            table.entry(key).or_insert(value);
        }
    }

    toml::Value::Table(table).try_into().unwrap_or_default()
}

/// Supplies the current preferences on demand
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Preferences;
}

/// Preferences read from a TOML file
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: Option<PathBuf>,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// `$X52PRO_CLOCKD_CONFIG`, else `<config dir>/x52pro-clockd/config.toml`
    pub fn from_env() -> Self {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml")));

        match path {
            Some(path) => Self::new(path),
            None => Self { path: None },
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Preferences {
        let Some(path) = &self.path else {
            return Preferences::default();
        };

        match std::fs::read_to_string(path) {
            Ok(text) => parse_preferences(&text),
            Err(e) => {
                debug!("No preferences at {}: {}", path.display(), e);
                Preferences::default()
            }
        }
    }
}
