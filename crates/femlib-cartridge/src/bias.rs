//! SIS bias ramps, bias calibration, and the PA drain servo.
//!
//! SIS junctions and their deflux magnets must never see a step change:
//! every setting is approached in small increments and the final value is
//! verified against the paired monitor point. A readback that refuses to
//! follow the command after retries usually means flux trapped in the
//! junction, which only defluxing cures, so the ramp reports it as such
//! rather than retrying forever.

use std::time::Duration;

use tracing::{debug, info, warn};

use femlib_core::{Error, Result};
use femlib_proto::MixerAddress;

use crate::controller::CartridgeController;

/// One bias ramp increment, mV.
const BIAS_STEP_MV: f32 = 0.05;

/// One magnet ramp increment, mA.
const MAGNET_STEP_MA: f32 = 0.1;

/// Dwell between ramp increments.
const RAMP_DWELL: Duration = Duration::from_millis(1);

/// Acceptable difference between readback and command after a ramp.
const RAMP_TOLERANCE: f32 = 0.001;

/// Whole-ramp attempts before a stuck readback is reported.
const RAMP_ATTEMPTS: u32 = 3;

/// Bias applied to every mixer while measuring its readback offset, mV.
const TEST_BIAS_MV: f32 = 2.2;

/// Readback samples averaged per mixer during bias calibration.
const BIAS_ERROR_SAMPLES: u32 = 100;

/// PA drain scale quantum (8-bit DAC across the 0..=2.5 range).
const PA_SERVO_STEP: f32 = 2.5 / 255.0;

/// Mixer current samples averaged per servo step.
const PA_SERVO_SAMPLES: u32 = 10;

/// Servo stops once the averaged mixer current is this close, uA.
const PA_SERVO_TOLERANCE_UA: f32 = 0.5;

/// Which quantity a verified ramp is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RampKind {
    BiasVoltage,
    MagnetCurrent,
}

impl RampKind {
    fn step(self) -> f32 {
        match self {
            RampKind::BiasVoltage => BIAS_STEP_MV,
            RampKind::MagnetCurrent => MAGNET_STEP_MA,
        }
    }

    fn label(self) -> &'static str {
        match self {
            RampKind::BiasVoltage => "sis bias",
            RampKind::MagnetCurrent => "magnet current",
        }
    }
}

impl CartridgeController {
    /// Ramp all four SIS bias voltages to `targets_mv` (indexed
    /// `pol * 2 + sideband`), compensated by the calibrated per-mixer
    /// offsets, and verify the readbacks.
    pub async fn ramp_sis_bias_voltages(&mut self, targets_mv: [f32; 4]) -> Result<()> {
        self.verified_ramp(RampKind::BiasVoltage, targets_mv).await
    }

    /// Ramp all four SIS magnet currents to `targets_ma` and verify the
    /// readbacks.
    pub async fn ramp_sis_magnet_currents(&mut self, targets_ma: [f32; 4]) -> Result<()> {
        self.verified_ramp(RampKind::MagnetCurrent, targets_ma).await
    }

    pub(crate) async fn verified_ramp(&mut self, kind: RampKind, targets: [f32; 4]) -> Result<()> {
        let mixers = self.mixers();
        let commanded: [f32; 4] = std::array::from_fn(|i| match kind {
            RampKind::BiasVoltage => targets[i] - self.state.bias_error[i],
            RampKind::MagnetCurrent => targets[i],
        });

        let mut mismatch: Option<(usize, f32)> = None;
        for attempt in 0..RAMP_ATTEMPTS {
            if attempt > 0 {
                warn!(
                    kind = kind.label(),
                    attempt, "ramp readback mismatch, re-ramping"
                );
            }
            for (i, mixer) in mixers.iter().enumerate() {
                self.ramp_one(kind, mixer, commanded[i]).await?;
                if kind == RampKind::BiasVoltage {
                    self.state.sis_v_commanded[i] = targets[i];
                }
            }

            mismatch = None;
            for (i, mixer) in mixers.iter().enumerate() {
                let readback = match kind {
                    RampKind::BiasVoltage => self.engine.sis_voltage(mixer).await?,
                    RampKind::MagnetCurrent => self.engine.sis_magnet_current(mixer).await?,
                };
                if kind == RampKind::BiasVoltage {
                    self.state.sis_v_readback[i] = readback;
                }
                if (readback - commanded[i]).abs() > RAMP_TOLERANCE && mismatch.is_none() {
                    mismatch = Some((i, readback));
                }
            }
            if mismatch.is_none() {
                return Ok(());
            }
        }

        let Some((i, readback)) = mismatch else {
            return Ok(());
        };
        Err(Error::TrappedFluxSuspected {
            polarization: mixers[i].polarization,
            sideband: mixers[i].sideband,
            commanded: targets[i],
            readback,
        })
    }

    /// Move one mixer's setting to `target` in increments of at most the
    /// ramp step, landing on the target exactly.
    async fn ramp_one(&mut self, kind: RampKind, mixer: &MixerAddress, target: f32) -> Result<()> {
        let step = kind.step();
        let mut value = match kind {
            RampKind::BiasVoltage => self.engine.sis_voltage(mixer).await?,
            RampKind::MagnetCurrent => self.engine.sis_magnet_current(mixer).await?,
        };
        while value != target {
            let delta = target - value;
            value = if delta.abs() <= step {
                target
            } else {
                value + step.copysign(delta)
            };
            match kind {
                RampKind::BiasVoltage => self.engine.set_sis_voltage(mixer, value).await?,
                RampKind::MagnetCurrent => {
                    self.engine.set_sis_magnet_current(mixer, value).await?
                }
            }
            self.clock.sleep(RAMP_DWELL).await;
        }
        Ok(())
    }

    /// Measure the per-mixer bias readback offset.
    ///
    /// With the PAs off and the magnets at their nominal currents, a fixed
    /// test bias is applied to every mixer and the averaged readback is
    /// compared against it. The resulting offsets compensate every later
    /// bias ramp.
    pub async fn calc_sis_bias_error(&mut self) -> Result<()> {
        let cart = self.model.band;
        info!(band = cart, "measuring SIS bias readback offsets");
        for channel in 0..2u8 {
            self.engine
                .set_pa_drain_voltage_scale(cart, channel, 0.0)
                .await?;
        }
        self.state.pa_drain_scale = [0.0; 2];

        if self.model.has_magnets {
            let targets = self.magnet_targets(self.state.lo_ghz);
            self.ramp_sis_magnet_currents(targets).await?;
        }
        self.state.bias_error = [0.0; 4];
        self.ramp_sis_bias_voltages([TEST_BIAS_MV; 4]).await?;

        let mixers = self.mixers();
        let mut errors = [0.0f32; 4];
        for (i, mixer) in mixers.iter().enumerate() {
            let mut sum = 0.0f64;
            for _ in 0..BIAS_ERROR_SAMPLES {
                sum += f64::from(self.engine.sis_voltage(mixer).await?);
            }
            errors[i] = (sum / f64::from(BIAS_ERROR_SAMPLES)) as f32 - TEST_BIAS_MV;
        }
        self.state.bias_error = errors;
        debug!(band = cart, ?errors, "bias readback offsets");
        Ok(())
    }

    /// Walk each PA channel's drain scale until its feedback mixer draws
    /// the band's target current.
    ///
    /// Starting from the band table's estimate, the scale moves one DAC
    /// count at a time toward the target, stopping when the averaged
    /// current is within tolerance or the error changes sign. The scale
    /// with the smallest observed error wins.
    pub(crate) async fn servo_pa(&mut self) -> Result<()> {
        let cart = self.model.band;
        let lo = self.state.lo_ghz;
        for channel in 0..2u8 {
            let pol = self.model.servo_feedback_pol[usize::from(channel)];
            let feedback = MixerAddress {
                cartridge: cart,
                polarization: pol,
                sideband: 0,
            };
            let tables = self.model.tables(self.state.hot);
            let target_ua = tables.sis_current_ua[usize::from(pol)].lookup(lo) as f32;
            let gate_v = tables.pa_gate_v[usize::from(channel)].lookup(lo) as f32;
            let mut scale = tables.pa_drain_scale[usize::from(channel)].lookup(lo) as f32;

            self.engine.set_pa_gate_voltage(cart, channel, gate_v).await?;

            let mut best_err = f32::INFINITY;
            let mut best_scale = scale;
            let mut initial_sign = 0.0f32;
            for _ in 0..=255u32 {
                self.engine
                    .set_pa_drain_voltage_scale(cart, channel, scale)
                    .await?;
                let mut sum = 0.0f64;
                for _ in 0..PA_SERVO_SAMPLES {
                    sum += f64::from(self.engine.sis_current(&feedback).await?);
                }
                let err = (sum / f64::from(PA_SERVO_SAMPLES)) as f32 - target_ua;

                if err.abs() < best_err {
                    best_err = err.abs();
                    best_scale = scale;
                }
                if err.abs() < PA_SERVO_TOLERANCE_UA {
                    break;
                }
                if initial_sign == 0.0 {
                    initial_sign = err.signum();
                } else if err.signum() != initial_sign {
                    // Stepped across the target.
                    break;
                }
                let next = (scale - initial_sign * PA_SERVO_STEP).clamp(0.0, 2.5);
                if next == scale {
                    break;
                }
                scale = next;
            }

            self.engine
                .set_pa_drain_voltage_scale(cart, channel, best_scale)
                .await?;
            self.state.pa_drain_scale[usize::from(channel)] = best_scale;
            debug!(
                band = cart,
                channel,
                scale = best_scale,
                err_ua = best_err,
                "PA servo settled"
            );
        }
        Ok(())
    }
}
