//! Deflux maintenance: demagnetization and mixer heating.
//!
//! Flux trapped in an SIS junction shows up as a bias readback that will
//! not follow its command. The cure is the deflux sequence: zero the bias
//! chain, degauss the deflux magnets with a decaying alternating current,
//! then heat each mixer block above its superconducting transition and
//! let it cool back down.

use std::time::Duration;

use tracing::{debug, info, warn};

use femlib_core::{Error, Result};

use crate::controller::CartridgeController;

/// Mixer block temperature that clears trapped flux, K.
const HEATING_TARGET_K: f32 = 12.0;

/// Heater-on iterations (one per second) before giving up on the target.
const HEATING_BUDGET: u32 = 30;

/// Cooldown iterations (one per second) before the mixer must be back at
/// its baseline temperature.
const COOLDOWN_BUDGET: u32 = 300;

/// A mixer counts as recovered within this margin of its baseline, K.
const COOLDOWN_MARGIN_K: f32 = 0.1;

/// Pacing of the heating and cooldown polls.
const THERMAL_POLL: Duration = Duration::from_secs(1);

impl CartridgeController {
    /// Degauss one mixer's deflux magnet.
    ///
    /// Drives the magnet through `+i, 0, -i, 0` at the band's dwell,
    /// decrementing `i` from the band's starting current down to zero. A
    /// no-op on bands without magnets and on a hot cartridge, where the
    /// junctions are not superconducting anyway.
    pub async fn demagnetize(&mut self, polarization: u8, sideband: u8) -> Result<()> {
        if !self.model.has_magnets || self.state.hot {
            debug!(
                band = self.model.band,
                polarization, sideband, "skipping demagnetize"
            );
            return Ok(());
        }
        if self.model.demag_decrement_ma <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "band {} has a non-positive demagnetize decrement",
                self.model.band
            )));
        }
        let mixer = self.mixers()[usize::from(polarization) * 2 + usize::from(sideband)];
        info!(
            band = self.model.band,
            polarization, sideband, "demagnetizing"
        );

        let mut current = self.model.demag_start_ma;
        while current > 0.0 {
            for phase in [current, 0.0, -current, 0.0] {
                self.engine.set_sis_magnet_current(&mixer, phase).await?;
                self.clock.sleep(self.model.demag_dwell).await;
            }
            current -= self.model.demag_decrement_ma;
        }
        self.engine.set_sis_magnet_current(&mixer, 0.0).await?;
        Ok(())
    }

    /// The full deflux sequence: bias chain to zero, every magnet
    /// degaussed, then both mixer blocks heated and cooled back down.
    pub async fn demagnetize_and_deflux(&mut self) -> Result<()> {
        self.ensure_powered().await?;
        info!(band = self.model.band, "defluxing");

        self.ramp_sis_bias_voltages([0.0; 4]).await?;
        if self.model.has_magnets {
            self.ramp_sis_magnet_currents([0.0; 4]).await?;
        }
        for pol in 0..2u8 {
            for sb in 0..2u8 {
                self.demagnetize(pol, sb).await?;
            }
        }
        for pol in 0..2u8 {
            self.mixer_heating(pol).await?;
        }
        self.publish();
        Ok(())
    }

    /// Heat one polarization's mixer block above the superconducting
    /// transition, then hold until it has cooled back to its starting
    /// temperature.
    ///
    /// Fails with [`Error::CooldownFailed`] if the block has not recovered
    /// its baseline within the cooldown budget.
    pub async fn mixer_heating(&mut self, polarization: u8) -> Result<()> {
        let cart = self.model.band;
        let sensor = polarization.min(1);
        let baseline = self.engine.cartridge_temperature(cart, sensor).await?;
        let baseline_ma = self.engine.sis_heater_current(cart, polarization).await?;
        info!(
            band = cart,
            polarization,
            baseline_k = baseline,
            heater_ma = baseline_ma,
            "heating mixer"
        );

        let mut reached = false;
        for _ in 0..HEATING_BUDGET {
            self.engine
                .set_sis_heater_enable(cart, polarization, true)
                .await?;
            self.clock.sleep(THERMAL_POLL).await;
            let kelvin = self.engine.cartridge_temperature(cart, sensor).await?;
            if kelvin >= HEATING_TARGET_K {
                debug!(band = cart, polarization, kelvin, "mixer warm");
                reached = true;
                break;
            }
        }
        self.engine
            .set_sis_heater_enable(cart, polarization, false)
            .await?;
        if !reached {
            warn!(
                band = cart,
                polarization, "mixer never reached the heating target"
            );
        }

        for _ in 0..COOLDOWN_BUDGET {
            let kelvin = self.engine.cartridge_temperature(cart, sensor).await?;
            if kelvin <= baseline + COOLDOWN_MARGIN_K {
                debug!(band = cart, polarization, kelvin, "mixer recovered");
                return Ok(());
            }
            self.clock.sleep(THERMAL_POLL).await;
        }
        Err(Error::CooldownFailed {
            baseline_k: baseline,
            timeout_s: u64::from(COOLDOWN_BUDGET),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bands::{band3, band6};
    use crate::testutil::controller;
    use femlib_proto::{points, rca, MixerAddress};
    use femlib_test_harness::MockCartridge;

    #[tokio::test]
    async fn demagnetize_alternates_and_decays_to_zero() {
        let (mut ctl, shared) = controller(band6(), MockCartridge::new(6)).await;
        ctl.demagnetize(0, 0).await.unwrap();

        let m = MixerAddress {
            cartridge: 6,
            polarization: 0,
            sideband: 0,
        };
        let control_rca = rca::control(points::sis_magnet_current(&m).unwrap());
        let values: Vec<f32> = shared
            .lock()
            .await
            .control_frames()
            .iter()
            .filter(|f| f.rca() == control_rca)
            .map(|f| {
                let d = f.data();
                f32::from_be_bytes([d[0], d[1], d[2], d[3]])
            })
            .collect();

        // 25 cycles of four phases, plus the final zero.
        assert_eq!(values.len(), 101);
        assert_eq!(values[0], 50.0);
        assert_eq!(values[2], -50.0);
        assert_eq!(*values.last().unwrap(), 0.0);
        let peak_after_decay = values[values.len() - 5];
        assert!(peak_after_decay.abs() <= 2.0);
        // Every second write returns the magnet to zero.
        for (i, v) in values.iter().enumerate() {
            if i % 2 == 1 {
                assert_eq!(*v, 0.0, "write {i} should be a zero phase");
            }
        }
    }

    #[tokio::test]
    async fn demagnetize_skips_bands_without_magnets() {
        let (mut ctl, shared) = controller(band3(), MockCartridge::new(3)).await;
        ctl.demagnetize(0, 0).await.unwrap();
        assert!(shared.lock().await.control_frames().is_empty());
    }

    #[tokio::test]
    async fn mixer_heating_recovers_baseline() {
        let mut mock = MockCartridge::new(6);
        mock.set_heater_profile(13.0, true);
        let (mut ctl, shared) = controller(band6(), mock).await;

        ctl.mixer_heating(0).await.unwrap();

        let mock = shared.lock().await;
        let temp = mock
            .f32_at(points::cartridge_temp(6, 0).unwrap())
            .unwrap();
        assert!((temp - 4.1).abs() < 1e-6);
        // The heater was switched off at the end.
        let enable_rca = rca::control(points::sis_heater_enable(6, 0).unwrap());
        let last_enable = mock
            .control_frames()
            .iter()
            .filter(|f| f.rca() == enable_rca)
            .next_back()
            .unwrap();
        assert_eq!(last_enable.data(), &[0]);
    }

    #[tokio::test]
    async fn heating_reads_the_baseline_heater_current() {
        let mut mock = MockCartridge::new(6);
        mock.set_heater_profile(13.0, true);
        // A hardware-error status on the heater current monitor must
        // surface before any heater enable is written.
        let mut poisoned = 1.5f32.to_be_bytes().to_vec();
        poisoned.push((-7i8) as u8);
        mock.set_register(points::sis_heater_current(6, 0).unwrap(), &poisoned);
        let (mut ctl, shared) = controller(band6(), mock).await;

        let err = ctl.mixer_heating(0).await.unwrap_err();
        match err {
            Error::HardwareFault { rca, code, .. } => {
                assert_eq!(rca, points::sis_heater_current(6, 0).unwrap());
                assert_eq!(code, -7);
            }
            other => panic!("expected HardwareFault, got {other:?}"),
        }
        let enable_rca = rca::control(points::sis_heater_enable(6, 0).unwrap());
        let enables = shared
            .lock()
            .await
            .control_frames()
            .iter()
            .filter(|f| f.rca() == enable_rca)
            .count();
        assert_eq!(enables, 0);
    }

    #[tokio::test]
    async fn stuck_warm_mixer_reports_cooldown_failure() {
        let mut mock = MockCartridge::new(6);
        mock.set_heater_profile(13.0, false);
        let (mut ctl, _shared) = controller(band6(), mock).await;

        let err = ctl.mixer_heating(0).await.unwrap_err();
        match err {
            Error::CooldownFailed {
                baseline_k,
                timeout_s,
            } => {
                assert!((baseline_k - 4.1).abs() < 1e-6);
                assert_eq!(timeout_s, 300);
            }
            other => panic!("expected CooldownFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deflux_requires_power() {
        let (mut ctl, _shared) = controller(band6(), MockCartridge::new(6)).await;
        let err = ctl.demagnetize_and_deflux().await.unwrap_err();
        assert!(matches!(err, Error::PowerDisabled(6)));
    }

    #[tokio::test]
    async fn deflux_runs_end_to_end() {
        let mut mock = MockCartridge::new(6);
        mock.set_heater_profile(13.0, true);
        let (mut ctl, shared) = controller(band6(), mock).await;
        ctl.power(true).await.unwrap();

        ctl.demagnetize_and_deflux().await.unwrap();

        // All four magnets saw the demagnetize waveform.
        let mock = shared.lock().await;
        for pol in 0..2u8 {
            for sb in 0..2u8 {
                let m = MixerAddress {
                    cartridge: 6,
                    polarization: pol,
                    sideband: sb,
                };
                let control_rca = rca::control(points::sis_magnet_current(&m).unwrap());
                let writes = mock
                    .control_frames()
                    .iter()
                    .filter(|f| f.rca() == control_rca)
                    .count();
                assert!(writes >= 101, "mixer {pol}/{sb} saw only {writes} writes");
            }
        }
    }
}
