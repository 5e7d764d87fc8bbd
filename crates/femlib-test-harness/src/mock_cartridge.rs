//! A simulated cartridge behind the [`Transport`] trait.
//!
//! Where [`crate::MockTransport`] replays a fixed script, [`MockCartridge`]
//! behaves like a device: it holds a register map keyed by RCA, answers
//! monitor requests from it, and applies control writes to it, mirroring
//! each commanded value into the paired monitor register the way real
//! firmware does. That makes it suitable for whole tuning sequences, where
//! the exact order of exchanges is an outcome of the algorithm rather than
//! something a test should spell out.
//!
//! A few knobs shape the simulated physics:
//!
//! - [`set_lock`](MockCartridge::set_lock) declares at which YTO coarse
//!   counts the PLL locks; the lock-detect registers follow every coarse
//!   write
//! - [`pin_monitor`](MockCartridge::pin_monitor) freezes a monitor
//!   register so mirroring skips it (a stuck readback, trapped flux)
//! - [`corrupt_next_controls`](MockCartridge::corrupt_next_controls)
//!   flips a bit in the next N control echoes to exercise write
//!   verification

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use femlib_core::{Error, Frame, Result, Transport};
use femlib_proto::points;
use femlib_proto::rca::{self, MixerAddress, PdAddress};

/// Lock-detect voltage reported when the loop is locked, V.
const LOCKED_VOLTAGE: f32 = 4.8;
/// Lock-detect voltage reported when the loop is unlocked, V.
const UNLOCKED_VOLTAGE: f32 = 0.2;

/// Default temperature ladder, K, sensors 0..=6 (cold stages first).
const DEFAULT_TEMPS: [f32; 7] = [4.1, 4.0, 4.3, 12.0, 45.0, 90.0, 110.0];

/// A stateful simulated cartridge.
pub struct MockCartridge {
    cart: u8,
    /// Monitor reply payload per RCA, trailing status byte included where
    /// the real device sends one.
    registers: HashMap<u32, Vec<u8>>,
    /// Monitor registers exempt from control-write mirroring.
    pinned: HashSet<u32>,
    rx_queue: VecDeque<Frame>,
    connected: bool,
    /// YTO coarse counts at which the PLL locks: (center, halfwidth).
    lock_at: Option<(u16, u16)>,
    /// Correction voltage model: (volts per count, coarse count at 0 V).
    corr_model: Option<(f32, u16)>,
    /// Heater model: (temperature reached while heating, whether the
    /// mixer cools back to its previous reading once disabled).
    heater_profile: Option<(f32, bool)>,
    heater_baseline: [f32; 2],
    /// PA drive model: uA of SIS mixer current per unit of drain scale,
    /// applied to the mixers of the driven polarization.
    pa_response: Option<f32>,
    coarse_writes: u32,
    corrupt_controls: u32,
    control_log: Vec<Frame>,
}

impl MockCartridge {
    /// Create a simulated cartridge in band position `cart` with a cold,
    /// unlocked, unbiased register map.
    pub fn new(cart: u8) -> Self {
        let mut mock = MockCartridge {
            cart,
            registers: HashMap::new(),
            pinned: HashSet::new(),
            rx_queue: VecDeque::new(),
            connected: true,
            lock_at: None,
            corr_model: None,
            heater_profile: None,
            heater_baseline: [DEFAULT_TEMPS[0], DEFAULT_TEMPS[1]],
            pa_response: None,
            coarse_writes: 0,
            corrupt_controls: 0,
            control_log: Vec::new(),
        };
        mock.populate_defaults();
        mock
    }

    fn populate_defaults(&mut self) {
        let c = self.cart;

        self.set_f32(points::pll_lock_voltage(c).unwrap(), UNLOCKED_VOLTAGE);
        self.set_f32(points::pll_correction_voltage(c).unwrap(), 0.0);
        self.set_f32(points::pll_ref_total_power(c).unwrap(), -1.2);
        self.set_f32(points::pll_if_total_power(c).unwrap(), -1.3);
        self.set_register(points::pll_unlock_latched(c).unwrap(), &[0, 0]);
        self.set_register(points::pll_loop_bandwidth(c).unwrap(), &[0, 0]);
        self.set_register(points::pll_lock_sideband(c).unwrap(), &[0, 0]);
        self.set_register(points::yto_coarse_tune(c).unwrap(), &[0, 0, 0]);

        for (sensor, kelvin) in DEFAULT_TEMPS.iter().enumerate() {
            self.set_f32(points::cartridge_temp(c, sensor as u8).unwrap(), *kelvin);
        }

        for pol in 0..=1u8 {
            for sb in 0..=1u8 {
                let m = MixerAddress {
                    cartridge: c,
                    polarization: pol,
                    sideband: sb,
                };
                self.set_f32(points::sis_voltage(&m).unwrap(), 0.0);
                self.set_f32(points::sis_current(&m).unwrap(), 0.0);
                self.set_register(points::sis_open_loop(&m).unwrap(), &[0, 0]);
                self.set_f32(points::sis_magnet_voltage(&m).unwrap(), 0.0);
                self.set_f32(points::sis_magnet_current(&m).unwrap(), 0.0);
                for stage in 0..=5u8 {
                    for point in 0..3u32 {
                        self.set_f32(points::lna_point(&m, stage, point).unwrap(), 0.0);
                    }
                }
                self.set_register(points::lna_enable(&m).unwrap(), &[0, 0]);
            }
            self.set_f32(points::sis_heater_current(c, pol).unwrap(), 0.0);
        }

        for channel in 0..=1u8 {
            for point in 0..3u32 {
                self.set_f32(points::pa_point(c, channel, point).unwrap(), 0.0);
            }
        }
        self.set_f32(points::pa_supply_3v(c).unwrap(), 3.3);
        self.set_f32(points::pa_supply_5v(c).unwrap(), 5.0);

        self.set_register(points::photomixer_enable(c).unwrap(), &[0, 0]);
        self.set_f32(points::photomixer_voltage(c).unwrap(), 0.0);
        self.set_f32(points::photomixer_current(c).unwrap(), 0.0);
        self.set_f32(points::amc_gate_b_voltage(c).unwrap(), 0.0);
        self.set_f32(points::amc_drain_b_voltage(c).unwrap(), 0.0);
        self.set_register(points::amc_multiplier_d(c).unwrap(), &[0, 0]);
        self.set_f32(points::amc_supply_5v(c).unwrap(), 5.0);

        self.set_register(points::pd_module_enable(c).unwrap(), &[0, 0]);
        for channel in 0..=6u8 {
            let pd = PdAddress {
                module: c,
                channel,
            };
            self.set_f32(points::pd_channel_voltage(&pd).unwrap(), 6.0);
            self.set_f32(points::pd_channel_current(&pd).unwrap(), 0.5);
        }

        // Identity replies carry no status byte.
        self.set_register(points::SERIAL_NUMBER, &[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        self.set_register(points::FIRMWARE_REVISION, &[2, 6, 3]);
    }

    /// Store an exact reply payload for a monitor RCA.
    pub fn set_register(&mut self, rca: u32, bytes: &[u8]) {
        self.registers.insert(rca, bytes.to_vec());
    }

    /// The stored reply payload for an RCA, if any.
    pub fn register(&self, rca: u32) -> Option<&[u8]> {
        self.registers.get(&rca).map(Vec::as_slice)
    }

    /// Store an f32 reply (big-endian, zero status byte appended).
    pub fn set_f32(&mut self, rca: u32, value: f32) {
        let mut bytes = value.to_be_bytes().to_vec();
        bytes.push(0);
        self.registers.insert(rca, bytes);
    }

    /// Read back an f32 register.
    pub fn f32_at(&self, rca: u32) -> Option<f32> {
        let bytes = self.registers.get(&rca)?;
        if bytes.len() < 4 {
            return None;
        }
        Some(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Freeze a monitor register at the given payload: control mirroring
    /// will no longer update it.
    pub fn pin_monitor(&mut self, rca: u32, bytes: &[u8]) {
        self.set_register(rca, bytes);
        self.pinned.insert(rca);
    }

    /// Declare the YTO coarse counts at which the PLL locks.
    pub fn set_lock(&mut self, center: u16, halfwidth: u16) {
        self.lock_at = Some((center, halfwidth));
        self.refresh_lock_registers();
    }

    /// How many YTO coarse control writes have been applied.
    pub fn coarse_writes(&self) -> u32 {
        self.coarse_writes
    }

    /// Flip a bit in the echoes of the next `n` control writes.
    pub fn corrupt_next_controls(&mut self, n: u32) {
        self.corrupt_controls = n;
    }

    /// Set the reported correction voltage, V.
    pub fn set_correction_voltage(&mut self, volts: f32) {
        self.set_f32(points::pll_correction_voltage(self.cart).unwrap(), volts);
    }

    /// Set a temperature sensor reading, K.
    pub fn set_temperature(&mut self, sensor: u8, kelvin: f32) {
        self.set_f32(points::cartridge_temp(self.cart, sensor).unwrap(), kelvin);
        if sensor < 2 {
            self.heater_baseline[sensor as usize] = kelvin;
        }
    }

    /// Model the correction voltage as linear in the coarse count:
    /// `corr = (zero_coarse - coarse) * volts_per_count`.
    pub fn set_correction_model(&mut self, volts_per_count: f32, zero_coarse: u16) {
        self.corr_model = Some((volts_per_count, zero_coarse));
        self.refresh_lock_registers();
    }

    /// Model PA drive: a drain-scale write of `s` on channel `c` sets the
    /// SIS mixer current of polarization `c` to `s * ua_per_scale`.
    pub fn set_pa_response(&mut self, ua_per_scale: f32) {
        self.pa_response = Some(ua_per_scale);
    }

    /// Model the mixer heater: enabling it drives the mixer temperature
    /// sensors (0 and 1) to `warm_to`; disabling it restores the previous
    /// reading if `cools_down` is set, otherwise the mixer stays warm.
    pub fn set_heater_profile(&mut self, warm_to: f32, cools_down: bool) {
        self.heater_profile = Some((warm_to, cools_down));
    }

    /// Every control frame applied, in order.
    pub fn control_frames(&self) -> &[Frame] {
        &self.control_log
    }

    /// The current YTO coarse word.
    pub fn coarse(&self) -> u16 {
        self.registers
            .get(&points::yto_coarse_tune(self.cart).unwrap())
            .filter(|b| b.len() >= 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .unwrap_or(0)
    }

    fn refresh_lock_registers(&mut self) {
        let coarse = self.coarse();
        let locked = match self.lock_at {
            Some((center, halfwidth)) => coarse.abs_diff(center) <= halfwidth,
            None => false,
        };
        let volts = if locked { LOCKED_VOLTAGE } else { UNLOCKED_VOLTAGE };
        self.set_f32(points::pll_lock_voltage(self.cart).unwrap(), volts);
        if let Some((per_count, zero)) = self.corr_model {
            let corr = (f32::from(zero) - f32::from(coarse)) * per_count;
            self.set_f32(points::pll_correction_voltage(self.cart).unwrap(), corr);
        }
    }

    fn apply_heater(&mut self, pol: u8, on: bool) {
        let Some((warm_to, cools_down)) = self.heater_profile else {
            return;
        };
        let sensor = pol.min(1);
        if on {
            self.set_f32(
                points::cartridge_temp(self.cart, sensor).unwrap(),
                warm_to,
            );
        } else if cools_down {
            let baseline = self.heater_baseline[sensor as usize];
            self.set_f32(points::cartridge_temp(self.cart, sensor).unwrap(), baseline);
        }
    }

    fn apply_control(&mut self, frame: &Frame) {
        self.control_log.push(frame.clone());
        let rca = frame.rca();
        let mut echo = frame.data().to_vec();
        if self.corrupt_controls > 0 {
            self.corrupt_controls -= 1;
            if let Some(last) = echo.last_mut() {
                *last ^= 0x01;
            }
        }
        echo.push(0);
        self.registers.insert(rca, echo.clone());

        // Firmware mirrors the commanded value into the paired monitor
        // point, unless a test has pinned it.
        if (rca::STANDARD_CONTROL..rca::SPECIAL_MONITOR).contains(&rca) {
            let monitor = rca - rca::STANDARD_CONTROL;
            if !self.pinned.contains(&monitor) {
                self.registers.insert(monitor, echo);
            }
        }

        let cart = self.cart;
        if rca == rca::control(points::yto_coarse_tune(cart).unwrap()) {
            self.coarse_writes += 1;
            self.refresh_lock_registers();
        } else if rca == rca::control(points::pll_clear_unlock_latch(cart).unwrap()) {
            self.set_register(points::pll_unlock_latched(cart).unwrap(), &[0, 0]);
        } else {
            for pol in 0..=1u8 {
                if rca == rca::control(points::sis_heater_enable(cart, pol).unwrap()) {
                    let on = frame.data().first().copied().unwrap_or(0) != 0;
                    self.apply_heater(pol, on);
                }
            }
            if let Some(gain) = self.pa_response {
                for channel in 0..=1u8 {
                    if rca != rca::control(points::pa_point(cart, channel, 0).unwrap()) {
                        continue;
                    }
                    let bytes = frame.data();
                    if bytes.len() < 4 {
                        continue;
                    }
                    let scale = f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    for sb in 0..=1u8 {
                        let m = MixerAddress {
                            cartridge: cart,
                            polarization: channel,
                            sideband: sb,
                        };
                        let monitor = points::sis_current(&m).unwrap();
                        if !self.pinned.contains(&monitor) {
                            self.set_f32(monitor, scale * gain);
                        }
                    }
                }
            }
        }
    }
}

/// A cloneable handle to a [`MockCartridge`] that also implements
/// [`Transport`].
///
/// The protocol engine takes exclusive ownership of its transport, which
/// would put the register map out of a test's reach. Handing the engine a
/// `SharedMockCartridge` instead lets the test keep a second handle for
/// adjusting the simulated physics mid-test and inspecting the control
/// log afterwards.
#[derive(Clone)]
pub struct SharedMockCartridge(Arc<Mutex<MockCartridge>>);

impl SharedMockCartridge {
    pub fn new(mock: MockCartridge) -> Self {
        SharedMockCartridge(Arc::new(Mutex::new(mock)))
    }

    /// Lock the underlying mock for inspection or adjustment.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, MockCartridge> {
        self.0.lock().await
    }
}

#[async_trait]
impl Transport for SharedMockCartridge {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.0.lock().await.send(frame).await
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Frame> {
        self.0.lock().await.recv(timeout).await
    }

    async fn drain(&mut self) {
        self.0.lock().await.drain().await;
    }

    async fn close(&mut self) -> Result<()> {
        self.0.lock().await.close().await
    }

    fn is_connected(&self) -> bool {
        // Cannot block here; a shared mock is connected until closed
        // through one of the handles, which tests observe via `lock()`.
        true
    }
}

#[async_trait]
impl Transport for MockCartridge {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if frame.is_empty() {
            // Monitor request.
            let reply = match self.registers.get(&frame.rca()) {
                Some(bytes) => Frame::new(frame.rca(), bytes)?,
                // Undefined address: a lone status byte.
                None => Frame::new(frame.rca(), &[(-12i8) as u8])?,
            };
            self.rx_queue.push_back(reply);
        } else {
            self.apply_control(frame);
        }
        Ok(())
    }

    async fn recv(&mut self, _timeout: Duration) -> Result<Frame> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.rx_queue.pop_front().ok_or(Error::Timeout)
    }

    async fn drain(&mut self) {
        self.rx_queue.clear();
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use femlib_proto::Engine;

    fn engine(mock: MockCartridge) -> Engine {
        Engine::with_policy(
            Box::new(mock),
            Duration::from_millis(50),
            femlib_core::RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(0),
            },
        )
    }

    #[tokio::test]
    async fn monitor_reads_registers() {
        let mut engine = engine(MockCartridge::new(6));
        let temp = engine.cartridge_temperature(6, 0).await.unwrap();
        assert!((temp - 4.1).abs() < 1e-6);
        let (major, minor, patch) = engine.firmware_revision().await.unwrap();
        assert_eq!((major, minor, patch), (2, 6, 3));
    }

    #[tokio::test]
    async fn undefined_address_reports_status() {
        let mut engine = engine(MockCartridge::new(6));
        let err = engine.get_u8(0x3F000).await.unwrap_err();
        assert!(matches!(err, Error::HardwareFault { code: -12, .. }));
    }

    #[tokio::test]
    async fn control_write_mirrors_to_monitor_point() {
        let mut engine = engine(MockCartridge::new(6));
        let m = MixerAddress {
            cartridge: 6,
            polarization: 0,
            sideband: 0,
        };
        engine.set_sis_voltage(&m, 2.2).await.unwrap();
        let readback = engine.sis_voltage(&m).await.unwrap();
        assert!((readback - 2.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn lock_follows_coarse_writes() {
        let mut mock = MockCartridge::new(6);
        mock.set_lock(2050, 0);
        let mut engine = engine(mock);

        engine.set_yto_coarse(6, 2047).await.unwrap();
        assert!(engine.pll_lock_voltage(6).await.unwrap() < 3.0);

        engine.set_yto_coarse(6, 2050).await.unwrap();
        assert!(engine.pll_lock_voltage(6).await.unwrap() > 3.0);
    }

    #[tokio::test]
    async fn corrupted_echo_trips_verification() {
        let mut mock = MockCartridge::new(6);
        // Corrupt every echo the engine will see.
        mock.corrupt_next_controls(10);
        let mut engine = engine(mock);

        let err = engine.set_yto_coarse(6, 100).await.unwrap_err();
        assert!(matches!(err, Error::VerificationFailed { .. }));
    }

    #[tokio::test]
    async fn pinned_monitor_survives_mirroring() {
        let mut mock = MockCartridge::new(6);
        let m = MixerAddress {
            cartridge: 6,
            polarization: 0,
            sideband: 0,
        };
        let monitor = points::sis_magnet_current(&m).unwrap();
        let mut stuck = 7.5f32.to_be_bytes().to_vec();
        stuck.push(0);
        mock.pin_monitor(monitor, &stuck);
        let mut engine = engine(mock);

        engine.set_sis_magnet_current(&m, 1.0).await.unwrap();
        let readback = engine.sis_magnet_current(&m).await.unwrap();
        assert!((readback - 7.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn correction_model_follows_coarse() {
        let mut mock = MockCartridge::new(6);
        mock.set_correction_model(0.5, 2000);
        let mut engine = engine(mock);

        engine.set_yto_coarse(6, 1990).await.unwrap();
        let corr = engine.pll_correction_voltage(6).await.unwrap();
        assert!((corr - 5.0).abs() < 1e-6);

        engine.set_yto_coarse(6, 2004).await.unwrap();
        let corr = engine.pll_correction_voltage(6).await.unwrap();
        assert!((corr + 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn shared_handle_exposes_control_log() {
        let shared = SharedMockCartridge::new(MockCartridge::new(6));
        let mut engine = engine_shared(shared.clone());
        engine.set_yto_coarse(6, 42).await.unwrap();

        let mock = shared.lock().await;
        assert_eq!(mock.coarse_writes(), 1);
        assert_eq!(mock.control_frames().len(), 1);
        assert_eq!(mock.control_frames()[0].data(), &[0, 42]);
    }

    fn engine_shared(shared: SharedMockCartridge) -> Engine {
        Engine::with_policy(
            Box::new(shared),
            Duration::from_millis(50),
            femlib_core::RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(0),
            },
        )
    }

    #[tokio::test]
    async fn heater_profile_warms_and_cools() {
        let mut mock = MockCartridge::new(6);
        mock.set_heater_profile(13.0, true);
        let mut engine = engine(mock);

        engine.set_sis_heater_enable(6, 0, true).await.unwrap();
        let warm = engine.cartridge_temperature(6, 0).await.unwrap();
        assert!((warm - 13.0).abs() < 1e-6);

        engine.set_sis_heater_enable(6, 0, false).await.unwrap();
        let cooled = engine.cartridge_temperature(6, 0).await.unwrap();
        assert!((cooled - 4.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn pa_response_drives_mixer_current() {
        let mut mock = MockCartridge::new(6);
        mock.set_pa_response(50.0);
        let mut engine = engine(mock);

        engine.set_pa_drain_voltage_scale(6, 0, 0.8).await.unwrap();
        let m = MixerAddress {
            cartridge: 6,
            polarization: 0,
            sideband: 0,
        };
        let ua = engine.sis_current(&m).await.unwrap();
        assert!((ua - 40.0).abs() < 1e-4);

        // The other polarization is not driven by channel 0.
        let other = MixerAddress {
            cartridge: 6,
            polarization: 1,
            sideband: 0,
        };
        assert_eq!(engine.sis_current(&other).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn clear_latch_resets_register() {
        let mut mock = MockCartridge::new(6);
        mock.set_register(points::pll_unlock_latched(6).unwrap(), &[1, 0]);
        let mut engine = engine(mock);

        assert!(engine.pll_unlock_latched(6).await.unwrap());
        engine.clear_unlock_latch(6).await.unwrap();
        assert!(!engine.pll_unlock_latched(6).await.unwrap());
    }
}
