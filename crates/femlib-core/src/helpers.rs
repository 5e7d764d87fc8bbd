//! Conversion helpers shared by the lookup tables and the tuning procedures.

/// Linearly interpolate `y` at `x` over ascending `(x, y)` breakpoints,
/// clamped at the table ends.
///
/// The breakpoint slice must be sorted ascending in `x`; table types
/// validate this at construction.
///
/// # Example
///
/// ```
/// use femlib_core::interp;
///
/// let pts = [(100.0, 1.0), (110.0, 2.0)];
/// assert_eq!(interp(&pts, 105.0), 1.5);
/// assert_eq!(interp(&pts, 90.0), 1.0);   // clamped low
/// assert_eq!(interp(&pts, 200.0), 2.0);  // clamped high
/// ```
pub fn interp(points: &[(f64, f64)], x: f64) -> f64 {
    match points {
        [] => 0.0,
        [(_, y)] => *y,
        _ => {
            let (x0, y0) = points[0];
            if x <= x0 {
                return y0;
            }
            let (xn, yn) = points[points.len() - 1];
            if x >= xn {
                return yn;
            }
            for pair in points.windows(2) {
                let (xa, ya) = pair[0];
                let (xb, yb) = pair[1];
                if x <= xb {
                    return ya + (yb - ya) * (x - xa) / (xb - xa);
                }
            }
            yn
        }
    }
}

/// Format an LO frequency in GHz for log lines, e.g. `"104.000 GHz"`.
pub fn format_lo_ghz(lo_ghz: f64) -> String {
    format!("{lo_ghz:.3} GHz")
}
