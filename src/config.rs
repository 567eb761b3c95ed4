//! Runtime configuration
//!
//! Defaults match a device with no overrides. A TOML file can be named with
//! `HWC_CONFIG`; individual environment variables win over the file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Result};

/// Coordinator settings read once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwcConfig {
    /// Largest width or height accepted for a virtual display, 0 = unbounded
    pub max_virtual_display_dimension: u32,
    /// Re-read identification data when a known display reconnects
    pub update_device_product_info_on_hotplug_reconnect: bool,
    /// Try the combined present-or-validate call before falling back
    pub skip_validate: bool,
    pub composer_service_name: String,
}

impl Default for HwcConfig {
    fn default() -> Self {
        Self {
            max_virtual_display_dimension: 0,
            update_device_product_info_on_hotplug_reconnect: false,
            skip_validate: true,
            composer_service_name: "default".to_string(),
        }
    }
}

impl HwcConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::parse(&contents)?;
        info!("Loaded composer config from {:?}", path);
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Defaults, then `HWC_CONFIG`, then per-setting environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("HWC_CONFIG") {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("HWC_MAX_VIRTUAL_DISPLAY_DIMENSION") {
            self.max_virtual_display_dimension = value.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "HWC_MAX_VIRTUAL_DISPLAY_DIMENSION is not a number: {:?}",
                    value
                ))
            })?;
        }
        if let Some(value) = lookup("HWC_UPDATE_PRODUCT_INFO_ON_RECONNECT") {
            self.update_device_product_info_on_hotplug_reconnect = parse_bool(&value)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "HWC_UPDATE_PRODUCT_INFO_ON_RECONNECT is not a boolean: {:?}",
                        value
                    ))
                })?;
        }
        if let Some(value) = lookup("HWC_SKIP_VALIDATE") {
            match parse_bool(&value) {
                Some(skip) => self.skip_validate = skip,
                None => warn!("Ignoring HWC_SKIP_VALIDATE={:?}", value),
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HwcConfig::default();
        assert_eq!(config.max_virtual_display_dimension, 0);
        assert!(!config.update_device_product_info_on_hotplug_reconnect);
        assert!(config.skip_validate);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HwcConfig::parse("max_virtual_display_dimension = 4096\n").unwrap();
        assert_eq!(config.max_virtual_display_dimension, 4096);
        assert!(config.skip_validate);
        assert_eq!(config.composer_service_name, "default");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "skip_validate = false").unwrap();
        writeln!(file, "update_device_product_info_on_hotplug_reconnect = true").unwrap();

        let config = HwcConfig::load(file.path()).unwrap();
        assert!(!config.skip_validate);
        assert!(config.update_device_product_info_on_hotplug_reconnect);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(matches!(
            HwcConfig::parse("max_virtual_display_dimension = \"big\""),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HWC_MAX_VIRTUAL_DISPLAY_DIMENSION", "1920"),
            ("HWC_UPDATE_PRODUCT_INFO_ON_RECONNECT", "yes"),
            ("HWC_SKIP_VALIDATE", "maybe"),
        ]
        .into_iter()
        .collect();

        let mut config = HwcConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_virtual_display_dimension, 1920);
        assert!(config.update_device_product_info_on_hotplug_reconnect);
        assert!(config.skip_validate);

        let mut config = HwcConfig::default();
        let err = config
            .apply_overrides(|key| {
                (key == "HWC_MAX_VIRTUAL_DISPLAY_DIMENSION").then(|| "wide".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
