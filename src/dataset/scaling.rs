use tracing::debug;

use crate::channels::{ChannelKind, ChannelRegistry};
use crate::dataset::{EnergyDataset, RawDataset, ScaledDataset};

/// Round to 3 decimal digits
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl RawDataset {
    /// Multiply every value of each listed column by its pulse ratio
    ///
    /// Columns that are not in the dataset are ignored. Consumes the raw
    /// dataset, so the same rows cannot be scaled twice.
    pub fn scale<'a>(self, ratios: impl IntoIterator<Item = (&'a str, f64)>) -> ScaledDataset {
        let ratios: Vec<(&str, f64)> = ratios.into_iter().collect();
        let mut readings = self.into_readings();

        for reading in &mut readings {
            for (column, ratio) in &ratios {
                if let Some(value) = reading.values.get_mut(*column) {
                    *value = round3(*value * ratio);
                }
            }
        }

        debug!(
            "Scaled {} rows across {} configured channels",
            readings.len(),
            ratios.len()
        );
        ScaledDataset::from_sorted(readings)
    }
}

impl ScaledDataset {
    /// Convert gas channels from volume to energy using the registry's gas factors
    ///
    /// When no gas conversion is configured the values pass through unchanged.
    pub fn to_energy(self, channels: &ChannelRegistry) -> EnergyDataset {
        let Some(conversion) = channels.gas_conversion() else {
            return self.retag();
        };
        let factor = conversion.kwh_per_cubic_metre();
        let gas_columns: Vec<&str> = channels
            .channels()
            .iter()
            .filter(|c| c.kind == ChannelKind::Gas)
            .map(|c| c.column.as_str())
            .collect();

        let mut readings = self.take_readings();
        for reading in &mut readings {
            for column in &gas_columns {
                if let Some(value) = reading.values.get_mut(*column) {
                    *value = round3(*value * factor);
                }
            }
        }
        EnergyDataset::from_sorted(readings)
    }
}
