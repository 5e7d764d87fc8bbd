//! The typed command catalogue.
//!
//! [`points`] builds the full monitor/control address for each hardware
//! point from its structured coordinates; the `impl Engine` block below
//! wraps those addresses in typed exchanges so callers never touch raw
//! RCAs. Units are noted on every method.
//!
//! Point offsets live in the low 7 bits of the standard space (below the
//! sideband bit), except the per-cartridge blocks at `0x800..` which sit
//! above the polarization bit.

use femlib_core::{Error, LockSide, Result, YTO_COARSE_MAX};

use crate::engine::Engine;
use crate::rca::{self, MixerAddress, PdAddress};

/// Monitor/control address builders for every catalogued point.
pub mod points {
    use super::*;

    // Per-mixer points (cartridge | polarization | sideband | offset).
    const SIS_VOLTAGE: u32 = 0x008;
    const SIS_CURRENT: u32 = 0x010;
    const SIS_OPEN_LOOP: u32 = 0x018;
    const SIS_MAGNET_VOLTAGE: u32 = 0x020;
    const SIS_MAGNET_CURRENT: u32 = 0x028;
    const LNA_BLOCK: u32 = 0x040;
    const LNA_ENABLE: u32 = 0x058;

    // Per-polarization points (cartridge | polarization | offset).
    const SIS_HEATER_CURRENT: u32 = 0x060;
    const SIS_HEATER_ENABLE: u32 = 0x062;

    // Per-cartridge points (cartridge | offset).
    const DAC_BLOCK: u32 = 0x0A0;
    const PA_BLOCK: u32 = 0x0B0;
    const PA_SUPPLY_3V: u32 = 0x0C0;
    const PA_SUPPLY_5V: u32 = 0x0C2;
    const PLL_LOCK_VOLTAGE: u32 = 0x800;
    const PLL_CORRECTION_VOLTAGE: u32 = 0x802;
    const PLL_REF_TOTAL_POWER: u32 = 0x804;
    const PLL_IF_TOTAL_POWER: u32 = 0x806;
    const PLL_UNLOCK_LATCHED: u32 = 0x808;
    const PLL_CLEAR_UNLOCK_LATCH: u32 = 0x80A;
    const PLL_LOOP_BANDWIDTH: u32 = 0x80C;
    const PLL_LOCK_SIDEBAND: u32 = 0x80E;
    const PLL_NULL_INTEGRATOR: u32 = 0x810;
    const YTO_COARSE_TUNE: u32 = 0x812;
    const CARTRIDGE_TEMP_BLOCK: u32 = 0x880;
    const PHOTOMIXER_ENABLE: u32 = 0x8A0;
    const PHOTOMIXER_VOLTAGE: u32 = 0x8A2;
    const PHOTOMIXER_CURRENT: u32 = 0x8A4;
    const AMC_GATE_B_VOLTAGE: u32 = 0x8C0;
    const AMC_DRAIN_B_VOLTAGE: u32 = 0x8C2;
    const AMC_MULTIPLIER_D: u32 = 0x8C4;
    const AMC_SUPPLY_5V: u32 = 0x8C6;

    // Power distribution points (module | channel | offset).
    const PD_CHANNEL_VOLTAGE: u32 = 0x0;
    const PD_CHANNEL_CURRENT: u32 = 0x1;
    const PD_MODULE_ENABLE: u32 = 0x38;

    /// Serial number, 8 bytes, special monitor space.
    pub const SERIAL_NUMBER: u32 = rca::SPECIAL_MONITOR;
    /// Firmware revision, 3 bytes (major, minor, patch).
    pub const FIRMWARE_REVISION: u32 = rca::SPECIAL_MONITOR + 0x1;
    // 0x2100D is skipped: firmware in the field NAKs that special-control
    // slot, so the catalogue leaves the address unassigned.

    fn mixer_point(addr: &MixerAddress, offset: u32) -> Result<u32> {
        Ok(addr.encode()? | offset)
    }

    fn pol_point(cart: u8, pol: u8, offset: u32) -> Result<u32> {
        Ok(rca::cartridge(cart)? | rca::polarization(pol)? | offset)
    }

    fn cart_point(cart: u8, offset: u32) -> Result<u32> {
        Ok(rca::cartridge(cart)? | offset)
    }

    pub fn sis_voltage(addr: &MixerAddress) -> Result<u32> {
        mixer_point(addr, SIS_VOLTAGE)
    }

    pub fn sis_current(addr: &MixerAddress) -> Result<u32> {
        mixer_point(addr, SIS_CURRENT)
    }

    pub fn sis_open_loop(addr: &MixerAddress) -> Result<u32> {
        mixer_point(addr, SIS_OPEN_LOOP)
    }

    pub fn sis_magnet_voltage(addr: &MixerAddress) -> Result<u32> {
        mixer_point(addr, SIS_MAGNET_VOLTAGE)
    }

    pub fn sis_magnet_current(addr: &MixerAddress) -> Result<u32> {
        mixer_point(addr, SIS_MAGNET_CURRENT)
    }

    /// One of the three monitor points of an LNA stage.
    /// `point`: 0 drain voltage, 1 drain current, 2 gate voltage.
    pub fn lna_point(addr: &MixerAddress, stage: u8, point: u32) -> Result<u32> {
        debug_assert!(point < 3);
        Ok(mixer_point(addr, LNA_BLOCK)? | rca::lna_stage(stage)? | point)
    }

    pub fn lna_enable(addr: &MixerAddress) -> Result<u32> {
        mixer_point(addr, LNA_ENABLE)
    }

    pub fn sis_heater_current(cart: u8, pol: u8) -> Result<u32> {
        pol_point(cart, pol, SIS_HEATER_CURRENT)
    }

    pub fn sis_heater_enable(cart: u8, pol: u8) -> Result<u32> {
        pol_point(cart, pol, SIS_HEATER_ENABLE)
    }

    pub fn dac_strobe(cart: u8, index: u8) -> Result<u32> {
        Ok(cart_point(cart, DAC_BLOCK)? | rca::dac(index)?)
    }

    /// One of the PA points of a channel.
    /// `point`: 0 drain voltage scale, 1 gate voltage, 2 drain current.
    pub fn pa_point(cart: u8, channel: u8, point: u32) -> Result<u32> {
        debug_assert!(point < 3);
        Ok(cart_point(cart, PA_BLOCK)? | rca::pa_channel(channel)? | point)
    }

    pub fn pa_supply_3v(cart: u8) -> Result<u32> {
        cart_point(cart, PA_SUPPLY_3V)
    }

    pub fn pa_supply_5v(cart: u8) -> Result<u32> {
        cart_point(cart, PA_SUPPLY_5V)
    }

    pub fn pll_lock_voltage(cart: u8) -> Result<u32> {
        cart_point(cart, PLL_LOCK_VOLTAGE)
    }

    pub fn pll_correction_voltage(cart: u8) -> Result<u32> {
        cart_point(cart, PLL_CORRECTION_VOLTAGE)
    }

    pub fn pll_ref_total_power(cart: u8) -> Result<u32> {
        cart_point(cart, PLL_REF_TOTAL_POWER)
    }

    pub fn pll_if_total_power(cart: u8) -> Result<u32> {
        cart_point(cart, PLL_IF_TOTAL_POWER)
    }

    pub fn pll_unlock_latched(cart: u8) -> Result<u32> {
        cart_point(cart, PLL_UNLOCK_LATCHED)
    }

    pub fn pll_clear_unlock_latch(cart: u8) -> Result<u32> {
        cart_point(cart, PLL_CLEAR_UNLOCK_LATCH)
    }

    pub fn pll_loop_bandwidth(cart: u8) -> Result<u32> {
        cart_point(cart, PLL_LOOP_BANDWIDTH)
    }

    pub fn pll_lock_sideband(cart: u8) -> Result<u32> {
        cart_point(cart, PLL_LOCK_SIDEBAND)
    }

    pub fn pll_null_integrator(cart: u8) -> Result<u32> {
        cart_point(cart, PLL_NULL_INTEGRATOR)
    }

    pub fn yto_coarse_tune(cart: u8) -> Result<u32> {
        cart_point(cart, YTO_COARSE_TUNE)
    }

    pub fn cartridge_temp(cart: u8, sensor: u8) -> Result<u32> {
        Ok(cart_point(cart, CARTRIDGE_TEMP_BLOCK)? | rca::cartridge_temp(sensor)?)
    }

    pub fn photomixer_enable(cart: u8) -> Result<u32> {
        cart_point(cart, PHOTOMIXER_ENABLE)
    }

    pub fn photomixer_voltage(cart: u8) -> Result<u32> {
        cart_point(cart, PHOTOMIXER_VOLTAGE)
    }

    pub fn photomixer_current(cart: u8) -> Result<u32> {
        cart_point(cart, PHOTOMIXER_CURRENT)
    }

    pub fn amc_gate_b_voltage(cart: u8) -> Result<u32> {
        cart_point(cart, AMC_GATE_B_VOLTAGE)
    }

    pub fn amc_drain_b_voltage(cart: u8) -> Result<u32> {
        cart_point(cart, AMC_DRAIN_B_VOLTAGE)
    }

    pub fn amc_multiplier_d(cart: u8) -> Result<u32> {
        cart_point(cart, AMC_MULTIPLIER_D)
    }

    pub fn amc_supply_5v(cart: u8) -> Result<u32> {
        cart_point(cart, AMC_SUPPLY_5V)
    }

    pub fn pd_channel_voltage(addr: &PdAddress) -> Result<u32> {
        Ok(addr.encode()? | PD_CHANNEL_VOLTAGE)
    }

    pub fn pd_channel_current(addr: &PdAddress) -> Result<u32> {
        Ok(addr.encode()? | PD_CHANNEL_CURRENT)
    }

    /// Module-level enable. Sits above the channel points (channels stop
    /// at index 6, leaving the 7th slot free).
    pub fn pd_module_enable(module: u8) -> Result<u32> {
        Ok(rca::POWER_DISTRIBUTION | rca::pd_module(module)? | PD_MODULE_ENABLE)
    }
}

impl Engine {
    // ---- PLL ----------------------------------------------------------

    /// PLL lock detect voltage, V. Locked above 3.0.
    pub async fn pll_lock_voltage(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::pll_lock_voltage(cart)?).await
    }

    /// PLL correction voltage, V, range roughly -10..10.
    pub async fn pll_correction_voltage(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::pll_correction_voltage(cart)?).await
    }

    /// Reference total power detector, V. Healthy below -0.5.
    pub async fn pll_ref_total_power(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::pll_ref_total_power(cart)?).await
    }

    /// IF total power detector, V. Healthy below -0.5.
    pub async fn pll_if_total_power(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::pll_if_total_power(cart)?).await
    }

    /// Whether an unlock event has been latched since the last clear.
    pub async fn pll_unlock_latched(&mut self, cart: u8) -> Result<bool> {
        Ok(self.get_u8(points::pll_unlock_latched(cart)?).await? != 0)
    }

    /// Clear the unlock detect latch.
    pub async fn clear_unlock_latch(&mut self, cart: u8) -> Result<()> {
        self.set_u8(rca::control(points::pll_clear_unlock_latch(cart)?), 1)
            .await
    }

    /// Loop bandwidth select: 0 normal, 1 alternate.
    pub async fn pll_loop_bandwidth(&mut self, cart: u8) -> Result<u8> {
        self.get_u8(points::pll_loop_bandwidth(cart)?).await
    }

    pub async fn set_pll_loop_bandwidth(&mut self, cart: u8, select: u8) -> Result<()> {
        self.set_u8(rca::control(points::pll_loop_bandwidth(cart)?), select)
            .await
    }

    /// Which side of the reference the loop locks on.
    pub async fn pll_lock_sideband(&mut self, cart: u8) -> Result<LockSide> {
        match self.get_u8(points::pll_lock_sideband(cart)?).await? {
            0 => Ok(LockSide::Below),
            _ => Ok(LockSide::Above),
        }
    }

    pub async fn set_pll_lock_sideband(&mut self, cart: u8, side: LockSide) -> Result<()> {
        self.set_u8(rca::control(points::pll_lock_sideband(cart)?), side.as_byte())
            .await
    }

    /// Zero the loop integrator (held while coarse tuning).
    pub async fn set_null_loop_integrator(&mut self, cart: u8, null: bool) -> Result<()> {
        self.set_u8(
            rca::control(points::pll_null_integrator(cart)?),
            u8::from(null),
        )
        .await
    }

    /// YTO coarse tune word, counts, 0..=4095.
    pub async fn yto_coarse(&mut self, cart: u8) -> Result<u16> {
        self.get_u16(points::yto_coarse_tune(cart)?).await
    }

    /// Command the YTO coarse tune word. Rejects counts above 4095
    /// before anything reaches the bus.
    pub async fn set_yto_coarse(&mut self, cart: u8, counts: u16) -> Result<()> {
        if counts > YTO_COARSE_MAX {
            return Err(Error::InvalidParameter(format!(
                "YTO coarse count {counts} exceeds {YTO_COARSE_MAX}"
            )));
        }
        self.set_u16(rca::control(points::yto_coarse_tune(cart)?), counts)
            .await
    }

    // ---- SIS mixers ---------------------------------------------------

    /// SIS junction voltage, mV.
    pub async fn sis_voltage(&mut self, addr: &MixerAddress) -> Result<f32> {
        self.get_f32(points::sis_voltage(addr)?).await
    }

    /// Command the SIS junction voltage, mV.
    pub async fn set_sis_voltage(&mut self, addr: &MixerAddress, mv: f32) -> Result<()> {
        self.set_f32(rca::control(points::sis_voltage(addr)?), mv).await
    }

    /// SIS junction current, uA.
    pub async fn sis_current(&mut self, addr: &MixerAddress) -> Result<f32> {
        self.get_f32(points::sis_current(addr)?).await
    }

    /// Whether the bias supply runs open-loop.
    pub async fn sis_open_loop(&mut self, addr: &MixerAddress) -> Result<bool> {
        Ok(self.get_u8(points::sis_open_loop(addr)?).await? != 0)
    }

    pub async fn set_sis_open_loop(&mut self, addr: &MixerAddress, open: bool) -> Result<()> {
        self.set_u8(rca::control(points::sis_open_loop(addr)?), u8::from(open))
            .await
    }

    /// SIS magnet voltage, V.
    pub async fn sis_magnet_voltage(&mut self, addr: &MixerAddress) -> Result<f32> {
        self.get_f32(points::sis_magnet_voltage(addr)?).await
    }

    /// SIS magnet current, mA.
    pub async fn sis_magnet_current(&mut self, addr: &MixerAddress) -> Result<f32> {
        self.get_f32(points::sis_magnet_current(addr)?).await
    }

    /// Command the SIS magnet current, mA.
    pub async fn set_sis_magnet_current(&mut self, addr: &MixerAddress, ma: f32) -> Result<()> {
        self.set_f32(rca::control(points::sis_magnet_current(addr)?), ma)
            .await
    }

    // ---- LNAs ---------------------------------------------------------

    /// LNA stage drain voltage, V.
    pub async fn lna_drain_voltage(&mut self, addr: &MixerAddress, stage: u8) -> Result<f32> {
        self.get_f32(points::lna_point(addr, stage, 0)?).await
    }

    pub async fn set_lna_drain_voltage(
        &mut self,
        addr: &MixerAddress,
        stage: u8,
        volts: f32,
    ) -> Result<()> {
        self.set_f32(rca::control(points::lna_point(addr, stage, 0)?), volts)
            .await
    }

    /// LNA stage drain current, mA.
    pub async fn lna_drain_current(&mut self, addr: &MixerAddress, stage: u8) -> Result<f32> {
        self.get_f32(points::lna_point(addr, stage, 1)?).await
    }

    pub async fn set_lna_drain_current(
        &mut self,
        addr: &MixerAddress,
        stage: u8,
        ma: f32,
    ) -> Result<()> {
        self.set_f32(rca::control(points::lna_point(addr, stage, 1)?), ma)
            .await
    }

    /// LNA stage gate voltage, V.
    pub async fn lna_gate_voltage(&mut self, addr: &MixerAddress, stage: u8) -> Result<f32> {
        self.get_f32(points::lna_point(addr, stage, 2)?).await
    }

    pub async fn lna_enabled(&mut self, addr: &MixerAddress) -> Result<bool> {
        Ok(self.get_u8(points::lna_enable(addr)?).await? != 0)
    }

    pub async fn set_lna_enable(&mut self, addr: &MixerAddress, enable: bool) -> Result<()> {
        self.set_u8(rca::control(points::lna_enable(addr)?), u8::from(enable))
            .await
    }

    // ---- SIS heaters --------------------------------------------------

    /// Mixer heater current, mA.
    pub async fn sis_heater_current(&mut self, cart: u8, pol: u8) -> Result<f32> {
        self.get_f32(points::sis_heater_current(cart, pol)?).await
    }

    /// Switch the mixer heater on or off. The hardware imposes its own
    /// maximum on-time; callers still bound theirs.
    pub async fn set_sis_heater_enable(&mut self, cart: u8, pol: u8, on: bool) -> Result<()> {
        self.set_u8(
            rca::control(points::sis_heater_enable(cart, pol)?),
            u8::from(on),
        )
        .await
    }

    // ---- Power amplifiers ---------------------------------------------

    /// PA drain voltage scale, 0.0..=2.5.
    pub async fn pa_drain_voltage_scale(&mut self, cart: u8, channel: u8) -> Result<f32> {
        self.get_f32(points::pa_point(cart, channel, 0)?).await
    }

    pub async fn set_pa_drain_voltage_scale(
        &mut self,
        cart: u8,
        channel: u8,
        scale: f32,
    ) -> Result<()> {
        self.set_f32(rca::control(points::pa_point(cart, channel, 0)?), scale)
            .await
    }

    /// PA gate voltage, V.
    pub async fn pa_gate_voltage(&mut self, cart: u8, channel: u8) -> Result<f32> {
        self.get_f32(points::pa_point(cart, channel, 1)?).await
    }

    pub async fn set_pa_gate_voltage(&mut self, cart: u8, channel: u8, volts: f32) -> Result<()> {
        self.set_f32(rca::control(points::pa_point(cart, channel, 1)?), volts)
            .await
    }

    /// PA drain current, mA.
    pub async fn pa_drain_current(&mut self, cart: u8, channel: u8) -> Result<f32> {
        self.get_f32(points::pa_point(cart, channel, 2)?).await
    }

    /// PA 3 V supply readback, V.
    pub async fn pa_supply_3v(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::pa_supply_3v(cart)?).await
    }

    /// PA 5 V supply readback, V.
    pub async fn pa_supply_5v(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::pa_supply_5v(cart)?).await
    }

    // ---- Cartridge temperatures ---------------------------------------

    /// Cartridge temperature sensor reading, K. Sensors 0..=6.
    pub async fn cartridge_temperature(&mut self, cart: u8, sensor: u8) -> Result<f32> {
        self.get_f32(points::cartridge_temp(cart, sensor)?).await
    }

    // ---- Photomixer ---------------------------------------------------

    pub async fn photomixer_enabled(&mut self, cart: u8) -> Result<bool> {
        Ok(self.get_u8(points::photomixer_enable(cart)?).await? != 0)
    }

    pub async fn set_photomixer_enable(&mut self, cart: u8, enable: bool) -> Result<()> {
        self.set_u8(
            rca::control(points::photomixer_enable(cart)?),
            u8::from(enable),
        )
        .await
    }

    /// Photomixer bias voltage, V.
    pub async fn photomixer_voltage(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::photomixer_voltage(cart)?).await
    }

    /// Photomixer current, mA.
    pub async fn photomixer_current(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::photomixer_current(cart)?).await
    }

    // ---- Multiplier chain ---------------------------------------------

    /// AMC stage B gate voltage, V.
    pub async fn amc_gate_b_voltage(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::amc_gate_b_voltage(cart)?).await
    }

    /// AMC stage B drain voltage, V.
    pub async fn amc_drain_b_voltage(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::amc_drain_b_voltage(cart)?).await
    }

    /// AMC multiplier D tune word, counts.
    pub async fn amc_multiplier_d(&mut self, cart: u8) -> Result<u8> {
        self.get_u8(points::amc_multiplier_d(cart)?).await
    }

    pub async fn set_amc_multiplier_d(&mut self, cart: u8, counts: u8) -> Result<()> {
        self.set_u8(rca::control(points::amc_multiplier_d(cart)?), counts)
            .await
    }

    /// AMC 5 V supply readback, V.
    pub async fn amc_supply_5v(&mut self, cart: u8) -> Result<f32> {
        self.get_f32(points::amc_supply_5v(cart)?).await
    }

    // ---- DACs ---------------------------------------------------------

    /// Strobe a cartridge DAC so staged words take effect.
    pub async fn dac_strobe(&mut self, cart: u8, index: u8) -> Result<()> {
        self.set_u8(rca::control(points::dac_strobe(cart, index)?), 1)
            .await
    }

    // ---- Power distribution -------------------------------------------

    /// PD channel voltage readback, V.
    pub async fn pd_channel_voltage(&mut self, addr: &PdAddress) -> Result<f32> {
        self.get_f32(points::pd_channel_voltage(addr)?).await
    }

    /// PD channel current readback, A.
    pub async fn pd_channel_current(&mut self, addr: &PdAddress) -> Result<f32> {
        self.get_f32(points::pd_channel_current(addr)?).await
    }

    /// Whether a cartridge's PD module is powered.
    pub async fn pd_module_enabled(&mut self, module: u8) -> Result<bool> {
        Ok(self.get_u8(points::pd_module_enable(module)?).await? != 0)
    }

    /// Power a cartridge's PD module on or off.
    pub async fn set_pd_module_enable(&mut self, module: u8, enable: bool) -> Result<()> {
        self.set_u8(
            rca::control(points::pd_module_enable(module)?),
            u8::from(enable),
        )
        .await
    }

    // ---- Identity -----------------------------------------------------

    /// The node's 8-byte serial number. No trailing status byte.
    pub async fn serial_number(&mut self) -> Result<Vec<u8>> {
        let frame = self.monitor(points::SERIAL_NUMBER).await?;
        Ok(frame.data().to_vec())
    }

    /// Firmware revision as (major, minor, patch).
    pub async fn firmware_revision(&mut self) -> Result<(u8, u8, u8)> {
        let frame = self.monitor(points::FIRMWARE_REVISION).await?;
        let data = frame.data();
        if data.len() < 3 {
            return Err(Error::Protocol(format!(
                "firmware revision reply has {} bytes, expected 3",
                data.len()
            )));
        }
        Ok((data[0], data[1], data[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(cart: u8, pol: u8, sb: u8) -> MixerAddress {
        MixerAddress {
            cartridge: cart,
            polarization: pol,
            sideband: sb,
        }
    }

    #[test]
    fn per_cartridge_points() {
        assert_eq!(points::pll_lock_voltage(0).unwrap(), 0x00800);
        assert_eq!(points::pll_lock_voltage(6).unwrap(), 0x06800);
        assert_eq!(points::yto_coarse_tune(6).unwrap(), 0x06812);
        assert_eq!(points::cartridge_temp(6, 0).unwrap(), 0x06880);
        assert_eq!(points::cartridge_temp(6, 6).unwrap(), 0x06898);
        assert_eq!(points::photomixer_voltage(2).unwrap(), 0x028A2);
    }

    #[test]
    fn mixer_points_combine_all_fields() {
        let m = mixer(6, 1, 1);
        assert_eq!(points::sis_voltage(&m).unwrap(), 0x6000 | 0x400 | 0x80 | 0x8);
        assert_eq!(points::sis_magnet_current(&m).unwrap(), 0x6000 | 0x400 | 0x80 | 0x28);
        let m0 = mixer(3, 0, 0);
        assert_eq!(points::sis_current(&m0).unwrap(), 0x3010);
    }

    #[test]
    fn lna_points_stride_by_stage() {
        let m = mixer(3, 0, 0);
        assert_eq!(points::lna_point(&m, 0, 0).unwrap(), 0x3040);
        assert_eq!(points::lna_point(&m, 1, 0).unwrap(), 0x3044);
        assert_eq!(points::lna_point(&m, 5, 2).unwrap(), 0x3040 | 0x14 | 0x2);
        assert!(points::lna_point(&m, 6, 0).is_err());
    }

    #[test]
    fn pa_points_stride_by_channel() {
        assert_eq!(points::pa_point(4, 0, 0).unwrap(), 0x40B0);
        assert_eq!(points::pa_point(4, 1, 2).unwrap(), 0x40B0 | 0x8 | 0x2);
        assert!(points::pa_point(4, 2, 0).is_err());
    }

    #[test]
    fn pd_points() {
        let ch = PdAddress { module: 6, channel: 2 };
        assert_eq!(points::pd_channel_voltage(&ch).unwrap(), 0xA000 | 0x180 | 0x10);
        assert_eq!(
            points::pd_channel_current(&ch).unwrap(),
            0xA000 | 0x180 | 0x10 | 0x1
        );
        assert_eq!(points::pd_module_enable(6).unwrap(), 0xA000 | 0x180 | 0x38);
        // The module enable slot never collides with a channel point.
        for c in 0..=6u8 {
            let a = PdAddress { module: 6, channel: c };
            assert_ne!(points::pd_channel_voltage(&a).unwrap(), points::pd_module_enable(6).unwrap());
        }
    }

    #[test]
    fn control_addresses_offset_by_64k() {
        let m = mixer(6, 0, 0);
        let monitor = points::sis_voltage(&m).unwrap();
        assert_eq!(rca::control(monitor), monitor + 0x10000);
    }

    #[test]
    fn special_points_are_fixed() {
        assert_eq!(points::SERIAL_NUMBER, 0x20000);
        assert_eq!(points::FIRMWARE_REVISION, 0x20001);
    }

    #[test]
    fn out_of_range_coordinates_fail_before_io() {
        assert!(points::pll_lock_voltage(10).is_err());
        assert!(points::cartridge_temp(0, 7).is_err());
        assert!(points::dac_strobe(0, 2).is_err());
        assert!(points::pd_module_enable(10).is_err());
    }
}
