//! PLL lock acquisition and FM trim.
//!
//! Locking is a search: the YTO coarse word is an open-loop estimate, so
//! the controller zig-zags outward from the estimated count until the
//! lock-detect voltage comes up, then releases the loop integrator and
//! confirms the lock with a full readback. The FM trim that follows moves
//! the locked loop's correction voltage toward a target by stepping the
//! coarse word underneath it, one count at a time after an initial
//! estimated jump.

use std::time::Duration;

use tracing::{debug, info, warn};

use femlib_core::{format_lo_ghz, CartridgeEvent, Error, Result, YTO_COARSE_MAX};

use crate::bands::FM_DEADBAND_V;
use crate::controller::CartridgeController;

/// Half-width of the coarse search window, GHz of YIG frequency.
const LOCK_WINDOW_GHZ: f64 = 0.05;

/// Outward probe spacing, GHz of YIG frequency.
const PROBE_STEP_GHZ: f64 = 0.003;

/// Dwell after each probe write before sampling the lock detector.
const PROBE_DWELL: Duration = Duration::from_millis(10);

/// Settle time after releasing the loop integrator.
const LOCK_SETTLE: Duration = Duration::from_millis(50);

/// Lock-detect voltage above which a probe counts as a hit, V.
const LOCK_THRESHOLD_V: f32 = 3.0;

/// Settle time after each FM trim step.
const FM_SETTLE: Duration = Duration::from_millis(50);

/// Upper bound on single-count FM trim steps.
const FM_MAX_STEPS: u32 = 100;

impl CartridgeController {
    /// Lock the PLL at `lo_ghz`.
    ///
    /// If the loop is already locked at the same frequency this is a
    /// no-op: no coarse write is issued, so re-tuning to the current
    /// frequency never perturbs a healthy lock. Otherwise the unlock
    /// latch is cleared, the loop integrator is nulled, and the coarse
    /// word zig-zags outward from the estimate until the lock detector
    /// responds.
    pub async fn lock_pll(&mut self, lo_ghz: f64) -> Result<()> {
        let (lo_min, lo_max) = self.model.lo_range_ghz();
        if !(lo_min..=lo_max).contains(&lo_ghz) {
            return Err(Error::InvalidParameter(format!(
                "LO {} outside band {} range [{:.3}, {:.3}] GHz",
                format_lo_ghz(lo_ghz),
                self.model.band,
                lo_min,
                lo_max
            )));
        }
        let yig_ghz = lo_ghz / self.model.total_multiplier();
        let step = self.model.yig_step_ghz();
        let target = (((yig_ghz - self.model.yig_lo_ghz) / step).round() as i64)
            .clamp(0, i64::from(YTO_COARSE_MAX));

        self.refresh_pll_readings().await?;
        if self.state.is_locked() && self.state.lo_ghz == lo_ghz {
            debug!(lo = %format_lo_ghz(lo_ghz), "already locked, skipping search");
            return Ok(());
        }

        let cart = self.model.band;
        self.engine.set_pll_lock_sideband(cart, self.lock_side).await?;
        self.engine.clear_unlock_latch(cart).await?;
        self.engine.set_null_loop_integrator(cart, true).await?;

        let window = (LOCK_WINDOW_GHZ / step) as i64 + 1;
        let probe = ((PROBE_STEP_GHZ / step) as i64).max(1);
        debug!(
            target,
            window, probe, "searching for lock"
        );

        let mut found = false;
        'search: for k in 0.. {
            let offset = k * probe;
            if offset > window {
                break;
            }
            let candidates: &[i64] = if k == 0 { &[0] } else { &[offset, -offset] };
            for &off in candidates {
                let counts = (target + off).clamp(0, i64::from(YTO_COARSE_MAX)) as u16;
                self.engine.set_yto_coarse(cart, counts).await?;
                self.clock.sleep(PROBE_DWELL).await;
                if self.engine.pll_lock_voltage(cart).await? > LOCK_THRESHOLD_V {
                    found = true;
                    break 'search;
                }
            }
        }
        self.engine.set_null_loop_integrator(cart, false).await?;

        if !found {
            let reason = format!(
                "no lock within {window} counts of estimate {target} at {}",
                format_lo_ghz(lo_ghz)
            );
            warn!(band = cart, "{reason}");
            self.telemetry.event(CartridgeEvent::LockLost {
                reason: reason.clone(),
            });
            return Err(Error::LockLost(reason));
        }

        self.clock.sleep(LOCK_SETTLE).await;
        self.refresh_pll_readings().await?;
        if !self.state.is_locked() {
            let reason = format!(
                "lock detector dropped after integrator release at {}",
                format_lo_ghz(lo_ghz)
            );
            warn!(band = cart, "{reason}");
            self.telemetry.event(CartridgeEvent::LockLost {
                reason: reason.clone(),
            });
            return Err(Error::LockLost(reason));
        }

        self.state.lo_ghz = lo_ghz;
        self.state.yig_ghz = yig_ghz;
        info!(
            band = cart,
            lo = %format_lo_ghz(lo_ghz),
            yto_coarse = self.state.yto_coarse,
            "PLL locked"
        );
        self.telemetry.event(CartridgeEvent::Locked {
            lo_ghz,
            yto_coarse: self.state.yto_coarse,
        });
        Ok(())
    }

    /// Center the locked loop's correction voltage on `target_v`.
    ///
    /// Within [`FM_DEADBAND_V`] of the target nothing moves. Beyond it,
    /// one estimated coarse jump (using the band's FM slope, which is set
    /// conservatively so the jump undershoots) is followed by single-count
    /// steps until the error changes sign. A trip of the unlock latch
    /// aborts with [`Error::LockLost`].
    pub async fn adjust_fm(&mut self, target_v: f32) -> Result<()> {
        let cart = self.model.band;
        let current = self.engine.pll_correction_voltage(cart).await?;
        self.state.pll_correction_voltage = current;
        let err = current - target_v;
        if err.abs() <= FM_DEADBAND_V {
            debug!(
                band = cart,
                correction_v = current,
                "correction voltage within deadband"
            );
            return Ok(());
        }

        let counts_per_volt = self.model.fm_slope_ghz_per_v / self.model.yig_step_ghz();
        let jump = (f64::from(err) * counts_per_volt).round() as i64;
        let mut coarse = (i64::from(self.engine.yto_coarse(cart).await?) + jump)
            .clamp(0, i64::from(YTO_COARSE_MAX)) as u16;
        debug!(band = cart, correction_v = current, jump, "FM trim");
        self.engine.set_yto_coarse(cart, coarse).await?;
        self.clock.sleep(FM_SETTLE).await;

        let direction: i64 = if err > 0.0 { 1 } else { -1 };
        for _ in 0..FM_MAX_STEPS {
            let corr = self.engine.pll_correction_voltage(cart).await?;
            self.state.pll_correction_voltage = corr;
            if f64::from(corr - target_v) * direction as f64 <= 0.0 {
                break;
            }
            if self.engine.pll_unlock_latched(cart).await? {
                let reason = "unlock latch tripped during FM trim".to_string();
                warn!(band = cart, "{reason}");
                self.telemetry.event(CartridgeEvent::LockLost {
                    reason: reason.clone(),
                });
                return Err(Error::LockLost(reason));
            }
            let next = (i64::from(coarse) + direction).clamp(0, i64::from(YTO_COARSE_MAX)) as u16;
            if next == coarse {
                // Pinned at the end of the coarse range.
                break;
            }
            coarse = next;
            self.engine.set_yto_coarse(cart, coarse).await?;
            self.clock.sleep(FM_SETTLE).await;
        }

        self.state.yto_coarse = coarse;
        self.state.pll_correction_voltage = self.engine.pll_correction_voltage(cart).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::{band6, CartridgeModel};
    use crate::testutil::controller;
    use femlib_proto::points;
    use femlib_test_harness::MockCartridge;

    /// Band 6 electronics with a 10-20 GHz YIG, giving a step of
    /// 10/4095 GHz per count.
    fn wide_model() -> CartridgeModel {
        let mut m = band6();
        m.yig_lo_ghz = 10.0;
        m.yig_hi_ghz = 20.0;
        m
    }

    #[tokio::test]
    async fn search_zigzags_outward_to_the_lock() {
        let mut mock = MockCartridge::new(6);
        // 270 GHz over the wide YIG estimates coarse 2048; the loop
        // actually locks three counts above it.
        mock.set_lock(2051, 0);
        let (mut ctl, shared) = controller(wide_model(), mock).await;

        ctl.lock_pll(270.0).await.unwrap();

        // Probes 2048, 2049, 2047, 2050, 2046, 2051: six coarse writes.
        assert_eq!(shared.lock().await.coarse_writes(), 6);
        assert_eq!(ctl.state().yto_coarse, 2051);
        assert_eq!(ctl.state().lo_ghz, 270.0);
        assert!(ctl.state().is_locked());
    }

    #[tokio::test]
    async fn relocking_the_same_frequency_writes_nothing() {
        let mut mock = MockCartridge::new(6);
        mock.set_lock(2048, 5);
        let (mut ctl, shared) = controller(wide_model(), mock).await;

        ctl.lock_pll(270.0).await.unwrap();
        let writes = shared.lock().await.coarse_writes();
        assert_eq!(writes, 1);

        ctl.lock_pll(270.0).await.unwrap();
        assert_eq!(shared.lock().await.coarse_writes(), writes);
    }

    #[tokio::test]
    async fn exhausted_search_reports_lock_lost() {
        // No lock anywhere on the coarse range.
        let (mut ctl, shared) = controller(band6(), MockCartridge::new(6)).await;

        let err = ctl.lock_pll(240.0).await.unwrap_err();
        assert!(matches!(err, Error::LockLost(_)));

        // Window 69 counts, probe spacing 4: the center plus 17 offsets
        // on each side.
        assert_eq!(shared.lock().await.coarse_writes(), 35);
        // The loop integrator was released on the way out.
        let mock = shared.lock().await;
        let integrator = femlib_proto::rca::control(points::pll_null_integrator(6).unwrap());
        let last = mock
            .control_frames()
            .iter()
            .filter(|f| f.rca() == integrator)
            .next_back()
            .unwrap();
        assert_eq!(last.data(), &[0]);
    }

    #[tokio::test]
    async fn out_of_band_frequency_is_rejected() {
        let (mut ctl, shared) = controller(band6(), MockCartridge::new(6)).await;
        let err = ctl.lock_pll(500.0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(shared.lock().await.control_frames().is_empty());
    }

    #[tokio::test]
    async fn fm_trim_jumps_then_single_steps() {
        let mut mock = MockCartridge::new(6);
        // 0.25 V per count, zero crossing at coarse 2020.
        mock.set_correction_model(0.25, 2020);
        let (mut ctl, shared) = controller(band6(), mock).await;

        ctl.engine.set_yto_coarse(6, 2000).await.unwrap();
        ctl.adjust_fm(0.0).await.unwrap();

        // The conservative slope estimate jumps 16 counts; four single
        // steps close the remaining volt.
        assert_eq!(ctl.state().yto_coarse, 2020);
        assert!(ctl.state().pll_correction_voltage.abs() < 1e-6);
        assert_eq!(shared.lock().await.coarse(), 2020);
    }

    #[tokio::test]
    async fn fm_trim_within_deadband_does_nothing() {
        let mut mock = MockCartridge::new(6);
        mock.set_correction_voltage(0.5);
        let (mut ctl, shared) = controller(band6(), mock).await;

        ctl.adjust_fm(0.0).await.unwrap();
        assert_eq!(shared.lock().await.coarse_writes(), 0);
    }

    #[tokio::test]
    async fn latch_trip_during_trim_reports_lock_lost() {
        let mut mock = MockCartridge::new(6);
        mock.set_correction_voltage(5.0);
        mock.set_register(points::pll_unlock_latched(6).unwrap(), &[1, 0]);
        let (mut ctl, _shared) = controller(band6(), mock).await;

        let err = ctl.adjust_fm(0.0).await.unwrap_err();
        assert!(matches!(err, Error::LockLost(_)));
    }
}
