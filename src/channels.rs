//! Meter channel configuration
//!
//! Channels are the fixed set of spreadsheet columns the dashboard knows how to
//! scale and label. They come from a TOML file (or the built-in defaults) and are
//! validated once at startup.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::dataset::{DATE_COLUMN, TIME_COLUMN};

#[derive(Error, Debug)]
pub enum ChannelConfigError {
    #[error("Failed to read channel config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse channel config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Channel config defines no channels")]
    Empty,

    #[error("Duplicate channel column: {0}")]
    DuplicateColumn(String),

    #[error("Duplicate channel label: {0}")]
    DuplicateLabel(String),

    #[error("Invalid channel {column}: {msg}")]
    InvalidChannel { column: String, msg: String },

    #[error("Invalid gas conversion: {0}")]
    InvalidGasConversion(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Electricity,
    Gas,
    Water,
}

/// One physical meter, identified by its raw export column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterChannel {
    pub column: String,
    pub label: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub kind: ChannelKind,
    pub pulse_ratio: f64,
    #[serde(default)]
    pub cost_per_unit: f64,
    #[serde(default)]
    pub carbon_per_unit: f64,
}

fn default_unit() -> String {
    "kWh".to_string()
}

/// Gas volume (m3) to energy (kWh) factors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasConversion {
    pub volume_correction: f64,
    /// Calorific value in MJ/m3
    pub calorific_value: f64,
}

impl GasConversion {
    const MJ_PER_KWH: f64 = 3.6;

    pub fn kwh_per_cubic_metre(&self) -> f64 {
        self.volume_correction * self.calorific_value / Self::MJ_PER_KWH
    }
}

impl Default for GasConversion {
    fn default() -> Self {
        Self {
            volume_correction: 1.02264,
            calorific_value: 39.5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChannelFile {
    channels: Vec<MeterChannel>,
    gas_conversion: Option<GasConversion>,
}

/// Validated channel set
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: Vec<MeterChannel>,
    gas_conversion: Option<GasConversion>,
}

impl ChannelRegistry {
    pub fn new(
        channels: Vec<MeterChannel>,
        gas_conversion: Option<GasConversion>,
    ) -> Result<Self, ChannelConfigError> {
        if channels.is_empty() {
            return Err(ChannelConfigError::Empty);
        }

        let mut columns = HashSet::new();
        let mut labels = HashSet::new();
        for channel in &channels {
            validate_channel(channel)?;
            if !columns.insert(channel.column.as_str()) {
                return Err(ChannelConfigError::DuplicateColumn(channel.column.clone()));
            }
            if !labels.insert(channel.label.as_str()) {
                return Err(ChannelConfigError::DuplicateLabel(channel.label.clone()));
            }
        }

        if let Some(gas) = &gas_conversion {
            if !(gas.volume_correction.is_finite() && gas.volume_correction > 0.0) {
                return Err(ChannelConfigError::InvalidGasConversion(format!(
                    "volume_correction must be positive, got {}",
                    gas.volume_correction
                )));
            }
            if !(gas.calorific_value.is_finite() && gas.calorific_value > 0.0) {
                return Err(ChannelConfigError::InvalidGasConversion(format!(
                    "calorific_value must be positive, got {}",
                    gas.calorific_value
                )));
            }
        }

        Ok(Self {
            channels,
            gas_conversion,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ChannelConfigError> {
        let file: ChannelFile = toml::from_str(contents)?;
        Self::new(file.channels, file.gas_conversion)
    }

    pub fn load(path: &Path) -> Result<Self, ChannelConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ChannelConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let registry = Self::from_toml_str(&contents)?;
        info!(
            "Loaded {} channels from {}",
            registry.channels.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Load from `path` when given, otherwise fall back to the built-in meters
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ChannelConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                info!("No channel config given, using built-in channels");
                Ok(Self::default())
            }
        }
    }

    pub fn channels(&self) -> &[MeterChannel] {
        &self.channels
    }

    pub fn get(&self, column: &str) -> Option<&MeterChannel> {
        self.channels.iter().find(|c| c.column == column)
    }

    pub fn label_for<'a>(&'a self, column: &'a str) -> &'a str {
        self.get(column).map(|c| c.label.as_str()).unwrap_or(column)
    }

    pub fn gas_conversion(&self) -> Option<&GasConversion> {
        self.gas_conversion.as_ref()
    }

    pub fn pulse_ratios(&self) -> impl Iterator<Item = (&str, f64)> {
        self.channels
            .iter()
            .map(|c| (c.column.as_str(), c.pulse_ratio))
    }
}

fn validate_channel(channel: &MeterChannel) -> Result<(), ChannelConfigError> {
    let invalid = |msg: String| ChannelConfigError::InvalidChannel {
        column: channel.column.clone(),
        msg,
    };

    let column = channel.column.trim();
    if column.is_empty() {
        return Err(invalid("column must not be empty".to_string()));
    }
    if column.eq_ignore_ascii_case(DATE_COLUMN) || column.eq_ignore_ascii_case(TIME_COLUMN) {
        return Err(invalid(format!("column name {column} is reserved")));
    }
    if channel.label.trim().is_empty() {
        return Err(invalid("label must not be empty".to_string()));
    }
    if !(channel.pulse_ratio.is_finite() && channel.pulse_ratio > 0.0) {
        return Err(invalid(format!(
            "pulse_ratio must be positive, got {}",
            channel.pulse_ratio
        )));
    }
    if !(channel.cost_per_unit.is_finite() && channel.cost_per_unit >= 0.0) {
        return Err(invalid(format!(
            "cost_per_unit must not be negative, got {}",
            channel.cost_per_unit
        )));
    }
    if !(channel.carbon_per_unit.is_finite() && channel.carbon_per_unit >= 0.0) {
        return Err(invalid(format!(
            "carbon_per_unit must not be negative, got {}",
            channel.carbon_per_unit
        )));
    }
    Ok(())
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let channel = |column: &str,
                       label: &str,
                       unit: &str,
                       kind: ChannelKind,
                       pulse_ratio: f64,
                       cost_per_unit: f64,
                       carbon_per_unit: f64| MeterChannel {
            column: column.to_string(),
            label: label.to_string(),
            unit: unit.to_string(),
            kind,
            pulse_ratio,
            cost_per_unit,
            carbon_per_unit,
        };

        Self {
            channels: vec![
                channel(
                    "TH-E-01 kWh (kWh) [DELTA] 1",
                    "Electricity",
                    "kWh",
                    ChannelKind::Electricity,
                    1.0,
                    0.245,
                    0.207,
                ),
                channel(
                    "TH-PM-01.TH-G-01 kWh (kWh) [DELTA] 1",
                    "Gas",
                    "m3",
                    ChannelKind::Gas,
                    0.1,
                    0.062,
                    0.183,
                ),
                channel(
                    "TH-PM-01.TH-W-01 kWh (kWh) [DELTA] 1",
                    "Water 1",
                    "m3",
                    ChannelKind::Water,
                    0.001,
                    2.05,
                    0.149,
                ),
                channel(
                    "TH-PM-01.TH-W-02 kWh (kWh) [DELTA] 1",
                    "Water 2",
                    "m3",
                    ChannelKind::Water,
                    0.001,
                    2.05,
                    0.149,
                ),
            ],
            gas_conversion: Some(GasConversion::default()),
        }
    }
}
