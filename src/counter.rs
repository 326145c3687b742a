//! Occupancy count derived from the latest detections.

use crate::detect::DetectionSet;
use crate::error::MalformedInputError;

/// Scalar people count.
///
/// `update` takes `Option` so a missing detection sequence is representable;
/// it counts as zero and is recorded as a malformed input.
#[derive(Debug, Default)]
pub struct OccupancyCounter {
    count: usize,
    malformed_inputs: u64,
    last_error: Option<MalformedInputError>,
}

impl OccupancyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the count with the size of `detections`.
    pub fn update(&mut self, detections: Option<&DetectionSet>) -> usize {
        match detections {
            Some(set) => {
                self.count = set.len();
                self.last_error = None;
            }
            None => {
                let err = MalformedInputError("detections missing".to_string());
                log::warn!("{}", err);
                self.malformed_inputs += 1;
                self.last_error = Some(err);
                self.count = 0;
            }
        }
        self.count
    }

    pub fn increment(&mut self) -> usize {
        self.count += 1;
        self.count
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Number of malformed inputs seen so far.
    pub fn malformed_inputs(&self) -> u64 {
        self.malformed_inputs
    }

    /// Diagnostic for the most recent update, if it was malformed.
    pub fn last_error(&self) -> Option<&MalformedInputError> {
        self.last_error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};

    fn set(n: usize) -> DetectionSet {
        (0..n)
            .map(|i| Detection::new(BoundingBox::new(i as u32 * 10, 0, 5, 5), 0.9))
            .collect()
    }

    #[test]
    fn count_equals_number_of_detections() {
        let mut counter = OccupancyCounter::new();
        for n in [0, 1, 3, 7, 2] {
            assert_eq!(counter.update(Some(&set(n))), n);
            assert_eq!(counter.count(), n);
        }
    }

    #[test]
    fn missing_detections_count_as_zero_with_diagnostic() {
        let mut counter = OccupancyCounter::new();
        counter.update(Some(&set(4)));
        assert_eq!(counter.update(None), 0);
        assert_eq!(counter.malformed_inputs(), 1);
        assert!(counter.last_error().is_some());

        counter.update(Some(&set(1)));
        assert!(counter.last_error().is_none());
    }

    #[test]
    fn manual_hooks() {
        let mut counter = OccupancyCounter::new();
        counter.increment();
        assert_eq!(counter.increment(), 2);
        counter.reset();
        assert_eq!(counter.count(), 0);
    }
}
