//! Common types shared across femlib crates.
//!
//! The types here are deliberately plain: a [`Frame`] is one addressed bus
//! exchange unit, [`TuningState`] is the explicit record of everything the
//! cartridge controller knows about its hardware, and [`RetryPolicy`] /
//! [`SimulationPolicy`] are small immutable values threaded through
//! construction instead of free-floating module globals.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Maximum payload size of one bus frame, in bytes.
pub const MAX_PAYLOAD: usize = 8;

/// Number of YTO coarse-tune counts (12-bit DAC, 0..=4095).
pub const YTO_COARSE_MAX: u16 = 4095;

/// One addressed frame on the monitor/control bus.
///
/// A frame is constructed and consumed entirely within one request/reply
/// call and never retained. The payload is at most [`MAX_PAYLOAD`] bytes;
/// a zero-length payload is a monitor request (or, on the receive side,
/// the bus echo of an outbound command).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    rca: u32,
    data: [u8; MAX_PAYLOAD],
    len: u8,
}

impl Frame {
    /// Create a frame carrying `data` addressed to `rca`.
    ///
    /// Fails with [`Error::Protocol`] if `data` exceeds [`MAX_PAYLOAD`] bytes.
    pub fn new(rca: u32, data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PAYLOAD {
            return Err(Error::Protocol(format!(
                "frame payload of {} bytes exceeds maximum of {MAX_PAYLOAD}",
                data.len()
            )));
        }
        let mut buf = [0u8; MAX_PAYLOAD];
        buf[..data.len()].copy_from_slice(data);
        Ok(Frame {
            rca,
            data: buf,
            len: data.len() as u8,
        })
    }

    /// Create a zero-length monitor request frame for `rca`.
    pub fn request(rca: u32) -> Self {
        Frame {
            rca,
            data: [0u8; MAX_PAYLOAD],
            len: 0,
        }
    }

    /// The relative CAN address (RCA) this frame is addressed to.
    pub fn rca(&self) -> u32 {
        self.rca
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// `true` if the frame carries no payload (a monitor request or a
    /// command echo seen on the shared bus).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RCA {:#07x} {:02X?}", self.rca, self.data())
    }
}

/// Which sideband the PLL locks against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockSide {
    /// Lock below the reference (LO below the sky frequency).
    Below,
    /// Lock above the reference.
    Above,
}

impl LockSide {
    /// Wire encoding of the lock polarity (0 = below, 1 = above).
    pub fn as_byte(self) -> u8 {
        match self {
            LockSide::Below => 0,
            LockSide::Above => 1,
        }
    }
}

/// Retry/backoff budget threaded through the request/reply engine and the
/// tuning procedures.
///
/// One value replaces the magic retry counts that would otherwise be
/// scattered through the engine and the ramp/search routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts for one logical exchange (reply match loop, and
    /// the outer send+verify loop of a control).
    pub max_attempts: u32,
    /// Delay inserted between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 10,
            backoff: Duration::from_millis(5),
        }
    }
}

/// A subsystem whose physical link can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Subsystem {
    /// The bus itself (no adapter/gateway present).
    Bus = 0,
    /// The cold cartridge and its bias hardware.
    Cartridge = 1,
    /// The power distribution module.
    PowerDistribution = 2,
    /// The reference signal source.
    SignalSource = 3,
    /// The cryostat temperature sensors.
    Cryostat = 4,
}

/// Immutable per-subsystem bitmask fixing which physical links are faked.
///
/// Computed once at construction from configuration and never mutated
/// except by building a new value during explicit reinitialisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationPolicy {
    bits: u8,
}

impl SimulationPolicy {
    /// A policy with nothing simulated (all hardware real).
    pub fn none() -> Self {
        SimulationPolicy { bits: 0 }
    }

    /// A policy with every subsystem simulated.
    pub fn all() -> Self {
        SimulationPolicy { bits: 0x1F }
    }

    /// Return a copy of this policy with `sub` marked as simulated.
    #[must_use]
    pub fn with(mut self, sub: Subsystem) -> Self {
        self.bits |= 1 << (sub as u8);
        self
    }

    /// `true` if the given subsystem's physical link is faked.
    pub fn simulated(&self, sub: Subsystem) -> bool {
        self.bits & (1 << (sub as u8)) != 0
    }
}

/// The cartridge controller's explicit tuning record.
///
/// Mutated exclusively by controller operations and published (as a
/// [`StateSnapshot`]) after every mutating call. There is no cross-component
/// sharing beyond that read-only publication.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningState {
    /// Commanded LO frequency in GHz. 0.0 until the first tune.
    pub lo_ghz: f64,
    /// YIG oscillator frequency in GHz (`lo_ghz / total multiplier`).
    pub yig_ghz: f64,
    /// YTO coarse tune count, 0..=4095.
    pub yto_coarse: u16,
    /// PLL lock-detect voltage readback, volts. Locked above 3.0 V.
    pub pll_lock_voltage: f32,
    /// PLL correction (control) voltage readback, volts.
    pub pll_correction_voltage: f32,
    /// PLL reference total power readback, volts (negative when in range).
    pub pll_ref_power: f32,
    /// PLL IF total power readback, volts (negative when in range).
    pub pll_if_power: f32,
    /// Sticky unlock-detect latch readback.
    pub pll_unlock_latch: bool,
    /// Per-mixer bias calibration offset (readback − commanded), millivolts.
    /// Indexed `[pol0/sb0, pol0/sb1, pol1/sb0, pol1/sb1]`.
    pub bias_error: [f32; 4],
    /// Last commanded SIS bias voltage per mixer, millivolts.
    pub sis_v_commanded: [f32; 4],
    /// Last readback SIS bias voltage per mixer, millivolts.
    pub sis_v_readback: [f32; 4],
    /// PA drain scale per polarization channel, raw 0.0..=2.5 scale units.
    pub pa_drain_scale: [f32; 2],
    /// Sticky thermal-safety flag. Once set, bias/PA/servo actions are
    /// suppressed until the controller is reinitialised.
    pub hot: bool,
}

impl TuningState {
    /// A cleared state, as after power-up or reinitialisation.
    pub fn cleared() -> Self {
        TuningState {
            lo_ghz: 0.0,
            yig_ghz: 0.0,
            yto_coarse: 0,
            pll_lock_voltage: 0.0,
            pll_correction_voltage: 0.0,
            pll_ref_power: 0.0,
            pll_if_power: 0.0,
            pll_unlock_latch: false,
            bias_error: [0.0; 4],
            sis_v_commanded: [0.0; 4],
            sis_v_readback: [0.0; 4],
            pa_drain_scale: [0.0; 2],
            hot: false,
        }
    }

    /// `true` if the last lock readbacks indicate a healthy lock:
    /// lock-detect above 3.0 V and both total-power readings in range.
    pub fn is_locked(&self) -> bool {
        self.pll_lock_voltage > 3.0
            && self.pll_ref_power < -0.5
            && self.pll_if_power < -0.5
            && !self.pll_unlock_latch
    }

    /// Flatten the state into named readings for the publish boundary.
    pub fn snapshot(&self) -> StateSnapshot {
        let mut readings: Vec<(String, f64)> = vec![
            ("lo_ghz".into(), self.lo_ghz),
            ("yig_ghz".into(), self.yig_ghz),
            ("yto_coarse".into(), f64::from(self.yto_coarse)),
            ("pll_lock_voltage".into(), f64::from(self.pll_lock_voltage)),
            (
                "pll_correction_voltage".into(),
                f64::from(self.pll_correction_voltage),
            ),
            ("pll_ref_power".into(), f64::from(self.pll_ref_power)),
            ("pll_if_power".into(), f64::from(self.pll_if_power)),
            (
                "pll_unlock_latch".into(),
                if self.pll_unlock_latch { 1.0 } else { 0.0 },
            ),
            ("hot".into(), if self.hot { 1.0 } else { 0.0 }),
        ];
        for i in 0..4 {
            readings.push((format!("bias_error_{i}"), f64::from(self.bias_error[i])));
            readings.push((
                format!("sis_v_commanded_{i}"),
                f64::from(self.sis_v_commanded[i]),
            ));
            readings.push((
                format!("sis_v_readback_{i}"),
                f64::from(self.sis_v_readback[i]),
            ));
        }
        for p in 0..2 {
            readings.push((
                format!("pa_drain_scale_{p}"),
                f64::from(self.pa_drain_scale[p]),
            ));
        }
        StateSnapshot { readings }
    }
}

/// A read-only, flattened copy of [`TuningState`] for publication.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    /// Named readings, in a stable order.
    pub readings: Vec<(String, f64)>,
}

impl StateSnapshot {
    /// Look up a reading by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.readings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}
