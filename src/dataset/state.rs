use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::marker::PhantomData;

use crate::dataset::Reading;

/// Rows exactly as parsed from the spreadsheets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Raw {}

/// Rows after pulse-ratio scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaled {}

/// Scaled rows with gas volume converted to energy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Energy {}

/// Sorted, deduplicated readings tagged with their conversion state
///
/// The state parameter only exists at the type level. Transitions consume the
/// dataset (`RawDataset::scale`, `ScaledDataset::to_energy`), so a scaled
/// dataset can never be scaled a second time.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset<S> {
    readings: Vec<Reading>,
    _state: PhantomData<S>,
}

pub type RawDataset = Dataset<Raw>;
pub type ScaledDataset = Dataset<Scaled>;
pub type EnergyDataset = Dataset<Energy>;

impl<S> Dataset<S> {
    /// Only callers that already guarantee order and uniqueness may use this
    pub(crate) fn from_sorted(readings: Vec<Reading>) -> Self {
        Self {
            readings,
            _state: PhantomData,
        }
    }

    pub(crate) fn retag<T>(self) -> Dataset<T> {
        Dataset::from_sorted(self.readings)
    }

    pub(crate) fn take_readings(self) -> Vec<Reading> {
        self.readings
    }

    pub fn empty() -> Self {
        Self::from_sorted(Vec::new())
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Every channel column that has at least one value
    pub fn columns(&self) -> BTreeSet<&str> {
        self.readings
            .iter()
            .flat_map(|r| r.values.keys().map(String::as_str))
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.readings.iter().any(|r| r.values.contains_key(column))
    }
}

impl Dataset<Raw> {
    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }
}

impl<S> Default for Dataset<S> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Serialized as the ordered list of flat records
impl<S> Serialize for Dataset<S> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> Result<Z::Ok, Z::Error> {
        self.readings.serialize(serializer)
    }
}
