//! Pose & FilterKey (component A).
//!
//! A `FilterKey` is the canonical, hashable form of a control message's
//! coordinate tuple. Two keys compare equal iff every coordinate matches —
//! no interpolation, no rounding, matching `Pose.from_filterValueList` in
//! `original_source/pybinsim`.

/// Canonical key addressing one entry of the filter table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey(Vec<i32>);

impl FilterKey {
    pub fn new(coordinates: Vec<i32>) -> Self {
        Self(coordinates)
    }

    pub fn coordinates(&self) -> &[i32] {
        &self.0
    }
}

/// Converts control-message values into a [`FilterKey`].
pub struct Pose;

impl Pose {
    /// Builds the lookup key from a channel's latest coordinate tuple, as
    /// delivered by `OscReceiver::get_current_values`.
    pub fn from_filter_values(values: &[i32]) -> FilterKey {
        FilterKey::new(values.to_vec())
    }
}
