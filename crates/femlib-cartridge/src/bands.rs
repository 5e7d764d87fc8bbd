//! Band definitions.
//!
//! A [`CartridgeModel`] carries everything that distinguishes one receiver
//! band from another: multiplier chain, YIG oscillator range, FM tuning
//! slope, demagnetization schedule, and the per-frequency bias tables in
//! both their cold and hot variants. The [`band3`], [`band6`], and
//! [`band7`] factories describe the three bands in this deployment;
//! further bands are added by writing another factory (or building a
//! [`CartridgeModel`] from configuration by hand).

use std::time::Duration;

use crate::tables::FreqTable;

/// Deadband around the FM target voltage within which no trim happens, V.
pub const FM_DEADBAND_V: f32 = 1.0;

/// Default FM tuning slope, GHz of YIG motion per volt of correction.
/// Deliberately conservative so the quick step undershoots.
pub const DEFAULT_FM_SLOPE: f64 = 0.0023;

/// The per-frequency bias tables of one band.
#[derive(Debug, Clone)]
pub struct BandTables {
    /// SIS bias voltage per mixer, mV. Indexed `pol * 2 + sideband`.
    pub sis_bias_mv: [FreqTable; 4],
    /// Target SIS mixer current per polarization, uA (PA servo setpoint).
    pub sis_current_ua: [FreqTable; 2],
    /// SIS magnet current per mixer, mA.
    pub sis_magnet_ma: [FreqTable; 4],
    /// LNA drain voltage, V (all stages).
    pub lna_drain_v: FreqTable,
    /// LNA drain current, mA (all stages).
    pub lna_drain_ma: FreqTable,
    /// PA drain scale per polarization, 0.0..=2.5.
    pub pa_drain_scale: [FreqTable; 2],
    /// PA gate voltage per polarization, V.
    pub pa_gate_v: [FreqTable; 2],
}

/// Physical description of one cartridge band.
#[derive(Debug, Clone)]
pub struct CartridgeModel {
    /// Band number, doubling as cartridge index and PD module index.
    pub band: u8,
    /// Cold (cryogenic) multiplication factor.
    pub cold_multiplier: u32,
    /// Warm (WCA) multiplication factor.
    pub warm_multiplier: u32,
    /// YIG oscillator range, GHz.
    pub yig_lo_ghz: f64,
    /// YIG oscillator range, GHz.
    pub yig_hi_ghz: f64,
    /// FM tuning slope, GHz per volt of correction voltage.
    pub fm_slope_ghz_per_v: f64,
    /// Which polarization's mixer current feeds back into the PA servo
    /// for each PA channel. Hardware-revision dependent: one deployment
    /// rewired channel 1 after a mixer failure, so this is configuration
    /// rather than a constant.
    pub servo_feedback_pol: [u8; 2],
    /// Whether the mixers carry deflux magnets at all.
    pub has_magnets: bool,
    /// Starting magnet current of the demagnetize cycle, mA.
    pub demag_start_ma: f32,
    /// Per-cycle decrement of the demagnetize current, mA.
    pub demag_decrement_ma: f32,
    /// Per-phase dwell of the demagnetize cycle.
    pub demag_dwell: Duration,
    /// Bias tables for normal cryogenic operation.
    pub cold: BandTables,
    /// Bias tables used once the thermal interlock reports the cartridge
    /// warm: reduced magnet currents and LNA bias that are safe above the
    /// superconducting transition.
    pub hot: BandTables,
}

impl CartridgeModel {
    /// Total LO multiplication from YIG to sky frequency.
    pub fn total_multiplier(&self) -> f64 {
        f64::from(self.cold_multiplier * self.warm_multiplier)
    }

    /// Tunable LO range, GHz.
    pub fn lo_range_ghz(&self) -> (f64, f64) {
        let m = self.total_multiplier();
        (self.yig_lo_ghz * m, self.yig_hi_ghz * m)
    }

    /// YIG frequency per coarse count, GHz.
    pub fn yig_step_ghz(&self) -> f64 {
        (self.yig_hi_ghz - self.yig_lo_ghz) / f64::from(femlib_core::YTO_COARSE_MAX)
    }

    /// The bias tables appropriate for the given thermal state.
    pub fn tables(&self, hot: bool) -> &BandTables {
        if hot {
            &self.hot
        } else {
            &self.cold
        }
    }

    /// Source name used in telemetry, e.g. `"band6"`.
    pub fn source_name(&self) -> String {
        format!("band{}", self.band)
    }
}

fn per_mixer(table: &FreqTable) -> [FreqTable; 4] {
    [table.clone(), table.clone(), table.clone(), table.clone()]
}

fn per_pol(table: &FreqTable) -> [FreqTable; 2] {
    [table.clone(), table.clone()]
}

/// Band 3: 92-108 GHz. No deflux magnets on these mixers.
pub fn band3() -> CartridgeModel {
    let bias = FreqTable::from_ascending(&[(92.0, 9.4), (100.0, 9.2), (108.0, 9.0)]);
    let current = FreqTable::from_ascending(&[(92.0, 42.0), (108.0, 45.0)]);
    let pa_scale = FreqTable::from_ascending(&[(92.0, 0.85), (100.0, 0.92), (108.0, 1.05)]);
    let pa_gate = FreqTable::constant(-0.15);
    let cold = BandTables {
        sis_bias_mv: per_mixer(&bias),
        sis_current_ua: per_pol(&current),
        sis_magnet_ma: per_mixer(&FreqTable::constant(0.0)),
        lna_drain_v: FreqTable::constant(1.1),
        lna_drain_ma: FreqTable::constant(4.0),
        pa_drain_scale: per_pol(&pa_scale),
        pa_gate_v: per_pol(&pa_gate),
    };
    let mut hot = cold.clone();
    hot.lna_drain_v = FreqTable::constant(0.0);
    hot.lna_drain_ma = FreqTable::constant(0.0);

    CartridgeModel {
        band: 3,
        cold_multiplier: 2,
        warm_multiplier: 3,
        yig_lo_ghz: 15.333,
        yig_hi_ghz: 18.0,
        fm_slope_ghz_per_v: DEFAULT_FM_SLOPE,
        servo_feedback_pol: [0, 1],
        has_magnets: false,
        demag_start_ma: 0.0,
        demag_decrement_ma: 0.0,
        demag_dwell: Duration::from_millis(100),
        cold,
        hot,
    }
}

/// Band 6: 216-270 GHz. The slow band: demagnetization runs a longer
/// dwell with a coarser current decrement.
pub fn band6() -> CartridgeModel {
    let bias = FreqTable::from_ascending(&[(216.0, 8.9), (240.0, 8.7), (270.0, 8.4)]);
    let current = FreqTable::from_ascending(&[(216.0, 37.0), (270.0, 41.0)]);
    let magnet = FreqTable::from_ascending(&[(216.0, 24.0), (240.0, 22.5), (270.0, 21.0)]);
    let pa_scale = FreqTable::from_ascending(&[(216.0, 0.60), (240.0, 0.72), (270.0, 0.95)]);
    let pa_gate = FreqTable::constant(-0.10);
    let cold = BandTables {
        sis_bias_mv: per_mixer(&bias),
        sis_current_ua: per_pol(&current),
        sis_magnet_ma: per_mixer(&magnet),
        lna_drain_v: FreqTable::constant(1.0),
        lna_drain_ma: FreqTable::constant(3.5),
        pa_drain_scale: per_pol(&pa_scale),
        pa_gate_v: per_pol(&pa_gate),
    };
    let mut hot = cold.clone();
    hot.sis_magnet_ma = per_mixer(&FreqTable::constant(0.0));
    hot.lna_drain_v = FreqTable::constant(0.0);
    hot.lna_drain_ma = FreqTable::constant(0.0);

    CartridgeModel {
        band: 6,
        cold_multiplier: 3,
        warm_multiplier: 6,
        yig_lo_ghz: 12.0,
        yig_hi_ghz: 15.0,
        fm_slope_ghz_per_v: DEFAULT_FM_SLOPE,
        servo_feedback_pol: [0, 1],
        has_magnets: true,
        demag_start_ma: 50.0,
        demag_decrement_ma: 2.0,
        demag_dwell: Duration::from_millis(200),
        cold,
        hot,
    }
}

/// Band 7: 284-364 GHz.
pub fn band7() -> CartridgeModel {
    let bias = FreqTable::from_ascending(&[(284.0, 2.28), (320.0, 2.24), (364.0, 2.18)]);
    let current = FreqTable::from_ascending(&[(284.0, 55.0), (364.0, 61.0)]);
    let magnet = FreqTable::from_ascending(&[(284.0, 31.0), (320.0, 29.0), (364.0, 27.5)]);
    let pa_scale = FreqTable::from_ascending(&[(284.0, 0.78), (320.0, 0.88), (364.0, 1.12)]);
    let pa_gate = FreqTable::constant(-0.12);
    let cold = BandTables {
        sis_bias_mv: per_mixer(&bias),
        sis_current_ua: per_pol(&current),
        sis_magnet_ma: per_mixer(&magnet),
        lna_drain_v: FreqTable::constant(0.9),
        lna_drain_ma: FreqTable::constant(3.0),
        pa_drain_scale: per_pol(&pa_scale),
        pa_gate_v: per_pol(&pa_gate),
    };
    let mut hot = cold.clone();
    hot.sis_magnet_ma = per_mixer(&FreqTable::constant(0.0));
    hot.lna_drain_v = FreqTable::constant(0.0);
    hot.lna_drain_ma = FreqTable::constant(0.0);

    CartridgeModel {
        band: 7,
        cold_multiplier: 3,
        warm_multiplier: 6,
        yig_lo_ghz: 15.777,
        yig_hi_ghz: 20.222,
        fm_slope_ghz_per_v: DEFAULT_FM_SLOPE,
        servo_feedback_pol: [0, 1],
        has_magnets: true,
        demag_start_ma: 30.0,
        demag_decrement_ma: 1.0,
        demag_dwell: Duration::from_millis(100),
        cold,
        hot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band6_ranges() {
        let m = band6();
        assert_eq!(m.total_multiplier(), 18.0);
        let (lo, hi) = m.lo_range_ghz();
        assert!((lo - 216.0).abs() < 1e-9);
        assert!((hi - 270.0).abs() < 1e-9);
        assert!((m.yig_step_ghz() - 3.0 / 4095.0).abs() < 1e-12);
    }

    #[test]
    fn hot_tables_zero_the_magnets() {
        let m = band7();
        assert!(m.tables(false).sis_magnet_ma[0].lookup(320.0) > 0.0);
        assert_eq!(m.tables(true).sis_magnet_ma[0].lookup(320.0), 0.0);
    }

    #[test]
    fn band3_has_no_magnets() {
        let m = band3();
        assert!(!m.has_magnets);
        assert_eq!(m.cold.sis_magnet_ma[0].lookup(100.0), 0.0);
    }

    #[test]
    fn source_names() {
        assert_eq!(band3().source_name(), "band3");
        assert_eq!(band7().source_name(), "band7");
    }

    #[test]
    fn bias_tables_follow_frequency() {
        let m = band6();
        let low = m.cold.sis_bias_mv[0].lookup(216.0);
        let high = m.cold.sis_bias_mv[0].lookup(270.0);
        assert!(low > high);
    }
}
