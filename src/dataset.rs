// Dataset module
//
// The merged, deduplicated time series of meter readings and the typed
// transitions it goes through: raw rows are merged, then scaled by pulse
// ratio, then (optionally) gas volume is converted to energy.

pub mod merge;
pub mod reading;
pub mod scaling;
pub mod state;
pub mod views;

pub use merge::{DedupePolicy, RefreshMode};
pub use reading::{DateKey, Reading, DATE_COLUMN, TIME_COLUMN, UNKNOWN_DATE_KEY};
pub use state::{Dataset, EnergyDataset, RawDataset, ScaledDataset};
pub use views::{DateSelection, Heatmap, QueryError};
