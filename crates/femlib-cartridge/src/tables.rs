//! Per-frequency lookup tables.
//!
//! Every band carries a set of tables keyed by ascending LO frequency:
//! PA drain scale and gate voltage, SIS bias voltage and target current,
//! SIS magnet current, and LNA bias. Lookups linearly interpolate between
//! breakpoints and clamp at the table ends, so a frequency slightly
//! outside the tabulated range still yields a sane setting.

use femlib_core::{interp, Error, Result};

/// A lookup table keyed by LO frequency in GHz.
#[derive(Debug, Clone, PartialEq)]
pub struct FreqTable {
    points: Vec<(f64, f64)>,
}

impl FreqTable {
    /// Build a table from `(lo_ghz, value)` breakpoints.
    ///
    /// Fails unless the frequency column is non-empty and strictly
    /// ascending.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::InvalidParameter(
                "frequency table must have at least one row".into(),
            ));
        }
        for pair in points.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(Error::InvalidParameter(format!(
                    "frequency table rows out of order: {} GHz follows {} GHz",
                    pair[1].0, pair[0].0
                )));
            }
        }
        Ok(FreqTable { points })
    }

    /// Build a table from breakpoints known to ascend, such as the
    /// band-module literals.
    pub(crate) fn from_ascending(points: &[(f64, f64)]) -> Self {
        debug_assert!(!points.is_empty());
        debug_assert!(points.windows(2).all(|pair| pair[1].0 > pair[0].0));
        FreqTable {
            points: points.to_vec(),
        }
    }

    /// A single-row table that returns `value` at every frequency.
    pub fn constant(value: f64) -> Self {
        FreqTable {
            points: vec![(0.0, value)],
        }
    }

    /// Interpolated value at `lo_ghz`, clamped at the table ends.
    pub fn lookup(&self, lo_ghz: f64) -> f64 {
        interp(&self.points, lo_ghz)
    }

    /// The tabulated frequency range `(first, last)` in GHz.
    pub fn range_ghz(&self) -> (f64, f64) {
        (self.points[0].0, self.points[self.points.len() - 1].0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_interpolates_and_clamps() {
        let t = FreqTable::new(vec![(216.0, 1.0), (240.0, 2.0), (264.0, 4.0)]).unwrap();
        assert!((t.lookup(228.0) - 1.5).abs() < 1e-12);
        assert!((t.lookup(252.0) - 3.0).abs() < 1e-12);
        assert_eq!(t.lookup(100.0), 1.0);
        assert_eq!(t.lookup(400.0), 4.0);
        assert_eq!(t.range_ghz(), (216.0, 264.0));
    }

    #[test]
    fn constant_table() {
        let t = FreqTable::constant(0.8);
        assert_eq!(t.lookup(1.0), 0.8);
        assert_eq!(t.lookup(350.0), 0.8);
    }

    #[test]
    fn ascending_literals_build_directly() {
        let t = FreqTable::from_ascending(&[(216.0, 1.0), (270.0, 2.0)]);
        assert_eq!(t.range_ghz(), (216.0, 270.0));
        assert!((t.lookup(243.0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_unordered_rows() {
        let result = FreqTable::new(vec![(240.0, 1.0), (216.0, 2.0)]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        let result = FreqTable::new(vec![(240.0, 1.0), (240.0, 2.0)]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn rejects_empty_table() {
        assert!(matches!(
            FreqTable::new(vec![]),
            Err(Error::InvalidParameter(_))
        ));
    }
}
