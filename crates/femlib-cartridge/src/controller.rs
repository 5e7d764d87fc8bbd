//! The cartridge controller.
//!
//! One [`CartridgeController`] owns one physical cartridge: the protocol
//! engine that talks to it, the band model describing it, and the
//! [`TuningState`] recording what has been commanded and read back. All
//! mutation goes through controller operations; after every mutating call
//! the state is published through the injected [`Telemetry`].
//!
//! The controller never spawns tasks. Long procedures are sequences of
//! short awaits on the injected [`Clock`], so an external executor
//! cancels them simply by not resuming the future. One controller means
//! one outstanding bus exchange at a time; serializing access across
//! controllers that share a bus is the caller's job.

use std::sync::Arc;

use tracing::{debug, info, warn};

use femlib_core::{
    CartridgeEvent, Clock, Error, LockSide, Result, SimulationPolicy, Subsystem, Telemetry,
    TuningState,
};
use femlib_proto::{Engine, MixerAddress};

use crate::bands::CartridgeModel;

/// Temperature sensors re-evaluated by the thermal interlock every update
/// cycle: the 4 K stage sensors and the mixer block.
pub(crate) const INTERLOCK_SENSORS: [u8; 3] = [0, 1, 2];

/// Valid open interval for the interlock sensors, K.
pub(crate) const INTERLOCK_RANGE_K: (f32, f32) = (0.0, 30.0);

/// Controller for one cartridge band.
pub struct CartridgeController {
    pub(crate) engine: Engine,
    pub(crate) model: CartridgeModel,
    pub(crate) state: TuningState,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) telemetry: Arc<dyn Telemetry>,
    pub(crate) simulation: SimulationPolicy,
    pub(crate) lock_side: LockSide,
}

impl CartridgeController {
    /// The current tuning record.
    pub fn state(&self) -> &TuningState {
        &self.state
    }

    /// The band model this controller was built with.
    pub fn model(&self) -> &CartridgeModel {
        &self.model
    }

    /// Whether the thermal interlock has tripped since the last
    /// reinitialisation.
    pub fn is_hot(&self) -> bool {
        self.state.hot
    }

    /// The four mixer addresses of this cartridge, indexed `pol * 2 + sb`.
    pub(crate) fn mixers(&self) -> [MixerAddress; 4] {
        let cart = self.model.band;
        [
            MixerAddress { cartridge: cart, polarization: 0, sideband: 0 },
            MixerAddress { cartridge: cart, polarization: 0, sideband: 1 },
            MixerAddress { cartridge: cart, polarization: 1, sideband: 0 },
            MixerAddress { cartridge: cart, polarization: 1, sideband: 1 },
        ]
    }

    pub(crate) fn publish(&self) {
        self.telemetry
            .publish(&self.model.source_name(), &self.state.snapshot());
    }

    /// Enable or disable the cartridge's power distribution module.
    ///
    /// Disabling clears the tuning record: nothing commanded before the
    /// power cycle survives it.
    pub async fn power(&mut self, enable: bool) -> Result<()> {
        if !self.simulation.simulated(Subsystem::PowerDistribution) {
            self.engine
                .set_pd_module_enable(self.model.band, enable)
                .await?;
        }
        info!(band = self.model.band, enable, "cartridge power");
        if !enable {
            let hot = self.state.hot;
            self.state = TuningState::cleared();
            self.state.hot = hot;
        }
        self.telemetry
            .event(CartridgeEvent::PowerChanged { enabled: enable });
        self.publish();
        Ok(())
    }

    /// Fail with [`Error::PowerDisabled`] unless the PD module is enabled.
    pub(crate) async fn ensure_powered(&mut self) -> Result<()> {
        if self.simulation.simulated(Subsystem::PowerDistribution) {
            return Ok(());
        }
        if self.engine.pd_module_enabled(self.model.band).await? {
            Ok(())
        } else {
            Err(Error::PowerDisabled(self.model.band))
        }
    }

    /// Refresh the PLL readings in the tuning record from hardware.
    pub(crate) async fn refresh_pll_readings(&mut self) -> Result<()> {
        let cart = self.model.band;
        self.state.pll_lock_voltage = self.engine.pll_lock_voltage(cart).await?;
        self.state.pll_correction_voltage = self.engine.pll_correction_voltage(cart).await?;
        self.state.pll_ref_power = self.engine.pll_ref_total_power(cart).await?;
        self.state.pll_if_power = self.engine.pll_if_total_power(cart).await?;
        self.state.pll_unlock_latch = self.engine.pll_unlock_latched(cart).await?;
        self.state.yto_coarse = self.engine.yto_coarse(cart).await?;
        Ok(())
    }

    /// One update cycle: refresh PLL readings, re-evaluate the thermal
    /// interlock, publish.
    pub async fn update_state(&mut self) -> Result<()> {
        if self.simulation.simulated(Subsystem::Cartridge) {
            self.publish();
            return Ok(());
        }
        self.refresh_pll_readings().await?;
        self.check_thermal_interlock().await?;
        self.telemetry.event(CartridgeEvent::StateUpdated {
            source: self.model.source_name(),
            snapshot: self.state.snapshot(),
        });
        self.publish();
        Ok(())
    }

    /// Re-evaluate the interlock sensors. The first out-of-range reading
    /// zeroes the cartridge exactly once and sets the sticky `hot` flag;
    /// later out-of-range cycles only log.
    pub(crate) async fn check_thermal_interlock(&mut self) -> Result<()> {
        if self.simulation.simulated(Subsystem::Cryostat) {
            return Ok(());
        }
        for sensor in INTERLOCK_SENSORS {
            let kelvin = self
                .engine
                .cartridge_temperature(self.model.band, sensor)
                .await?;
            let (low, high) = INTERLOCK_RANGE_K;
            if kelvin > low && kelvin < high {
                continue;
            }
            if self.state.hot {
                debug!(band = self.model.band, sensor, kelvin, "still hot");
                return Ok(());
            }
            warn!(
                band = self.model.band,
                sensor, kelvin, "thermal interlock tripped, zeroing cartridge"
            );
            self.state.hot = true;
            self.telemetry.event(CartridgeEvent::ThermalShutdown {
                sensor,
                temperature_k: kelvin,
            });
            self.zero().await?;
            return Ok(());
        }
        Ok(())
    }

    /// Bring the cartridge to a safe idle: PA off, biases and magnets
    /// ramped to zero, LNAs disabled.
    ///
    /// Runs regardless of the `hot` flag; this is the safety action the
    /// flag exists to trigger.
    pub async fn zero(&mut self) -> Result<()> {
        if self.simulation.simulated(Subsystem::Cartridge) {
            self.state.sis_v_commanded = [0.0; 4];
            self.state.sis_v_readback = [0.0; 4];
            self.state.pa_drain_scale = [0.0; 2];
            self.publish();
            return Ok(());
        }
        let cart = self.model.band;
        for channel in 0..2u8 {
            self.engine.set_pa_drain_voltage_scale(cart, channel, 0.0).await?;
            self.engine.set_pa_gate_voltage(cart, channel, 0.0).await?;
        }
        self.state.pa_drain_scale = [0.0; 2];

        self.ramp_sis_bias_voltages([0.0; 4]).await?;
        if self.model.has_magnets {
            self.ramp_sis_magnet_currents([0.0; 4]).await?;
        }
        for mixer in self.mixers() {
            self.engine.set_lna_enable(&mixer, false).await?;
        }
        info!(band = cart, "cartridge zeroed");
        self.publish();
        Ok(())
    }

    /// Clear the tuning record, including the sticky `hot` flag, and take
    /// a fresh reading. The only way out of a thermal shutdown.
    pub async fn reinitialize(&mut self) -> Result<()> {
        self.state = TuningState::cleared();
        self.update_state().await
    }

    /// Select which side of the reference the PLL locks on.
    pub async fn set_lock_side(&mut self, side: LockSide) -> Result<()> {
        if !self.simulation.simulated(Subsystem::Cartridge) {
            self.engine
                .set_pll_lock_sideband(self.model.band, side)
                .await?;
        }
        self.lock_side = side;
        Ok(())
    }

    /// Tune the cartridge to `lo_ghz`.
    ///
    /// Locks the PLL, trims the correction voltage toward `fm_target_v`,
    /// and (unless `lock_only` or the cartridge is hot) applies the full
    /// bias chain: magnet currents, bias calibration on first use, SIS
    /// bias voltages, LNA bias, and the PA servo.
    pub async fn tune(&mut self, lo_ghz: f64, fm_target_v: f32, lock_only: bool) -> Result<()> {
        if self.simulation.simulated(Subsystem::Cartridge) {
            return self.tune_simulated(lo_ghz);
        }
        self.ensure_powered().await?;
        self.check_thermal_interlock().await?;

        self.lock_pll(lo_ghz).await?;
        self.adjust_fm(fm_target_v).await?;

        if lock_only {
            self.publish();
            return Ok(());
        }
        if self.state.hot {
            warn!(
                band = self.model.band,
                "cartridge is hot, skipping bias and PA"
            );
            self.publish();
            return Ok(());
        }

        let lo = self.state.lo_ghz;
        let magnet_targets = self.magnet_targets(lo);
        if self.model.has_magnets {
            self.ramp_sis_magnet_currents(magnet_targets).await?;
        }
        if self.state.bias_error == [0.0; 4] {
            self.calc_sis_bias_error().await?;
        }
        let bias_targets = self.bias_targets(lo);
        self.ramp_sis_bias_voltages(bias_targets).await?;
        self.apply_lna_bias(lo).await?;
        self.servo_pa().await?;

        self.update_state().await
    }

    fn tune_simulated(&mut self, lo_ghz: f64) -> Result<()> {
        let (lo_min, lo_max) = self.model.lo_range_ghz();
        if !(lo_min..=lo_max).contains(&lo_ghz) {
            return Err(Error::InvalidParameter(format!(
                "LO {lo_ghz} GHz outside band {} range [{lo_min:.3}, {lo_max:.3}]",
                self.model.band
            )));
        }
        let yig = lo_ghz / self.model.total_multiplier();
        self.state.lo_ghz = lo_ghz;
        self.state.yig_ghz = yig;
        self.state.yto_coarse = (((yig - self.model.yig_lo_ghz) / self.model.yig_step_ghz())
            .round() as i64)
            .clamp(0, i64::from(femlib_core::YTO_COARSE_MAX)) as u16;
        self.state.pll_lock_voltage = 4.8;
        self.state.pll_ref_power = -1.2;
        self.state.pll_if_power = -1.3;
        self.state.pll_unlock_latch = false;
        self.publish();
        Ok(())
    }

    pub(crate) fn bias_targets(&self, lo_ghz: f64) -> [f32; 4] {
        let tables = self.model.tables(self.state.hot);
        std::array::from_fn(|i| tables.sis_bias_mv[i].lookup(lo_ghz) as f32)
    }

    pub(crate) fn magnet_targets(&self, lo_ghz: f64) -> [f32; 4] {
        let tables = self.model.tables(self.state.hot);
        std::array::from_fn(|i| tables.sis_magnet_ma[i].lookup(lo_ghz) as f32)
    }

    /// Apply the band's LNA bias at `lo_ghz` and enable the amplifiers.
    pub(crate) async fn apply_lna_bias(&mut self, lo_ghz: f64) -> Result<()> {
        let tables = self.model.tables(self.state.hot);
        let drain_v = tables.lna_drain_v.lookup(lo_ghz) as f32;
        let drain_ma = tables.lna_drain_ma.lookup(lo_ghz) as f32;
        for mixer in self.mixers() {
            for stage in 0..3u8 {
                self.engine.set_lna_drain_voltage(&mixer, stage, drain_v).await?;
                self.engine.set_lna_drain_current(&mixer, stage, drain_ma).await?;
            }
            self.engine.set_lna_enable(&mixer, true).await?;
        }
        Ok(())
    }

    /// Close the underlying transport. The controller is unusable
    /// afterwards.
    pub async fn close(&mut self) -> Result<()> {
        self.engine.close().await
    }
}
