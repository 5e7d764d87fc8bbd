//! RCA (relative CAN address) field packing.
//!
//! Every monitor/control point on the bus is identified by an 18-bit RCA
//! offset built from structured coordinates: which cartridge, which
//! polarization channel, which sideband, which LNA stage, and so on. The
//! functions here validate each field against its declared range and
//! combine the fields with fixed shifts. No I/O happens in this module;
//! an out-of-range field is rejected with [`Error::Address`] naming the
//! field and its valid interval before anything touches the bus.
//!
//! # Address space
//!
//! ```text
//! 0x00000  standard monitor        0x10000  standard control
//! 0x20000  special monitor         0x21000  special control
//! ```
//!
//! Within the standard space, bits 12..=15 select the cartridge, bit 10
//! the polarization, and bit 7 the sideband; the power distribution
//! subsystem occupies `0xA000..` above the ten cartridge blocks.

use femlib_core::{Error, Result};

/// Base of the standard monitor address space.
pub const STANDARD_MONITOR: u32 = 0x00000;

/// Base of the standard control address space.
pub const STANDARD_CONTROL: u32 = 0x10000;

/// Base of the special monitor address space.
pub const SPECIAL_MONITOR: u32 = 0x20000;

/// Base of the special control address space.
pub const SPECIAL_CONTROL: u32 = 0x21000;

/// Base of the power distribution block within the standard space.
pub const POWER_DISTRIBUTION: u32 = 0xA000;

/// Map a standard-monitor RCA to its paired control RCA.
pub const fn control(monitor_rca: u32) -> u32 {
    monitor_rca + STANDARD_CONTROL
}

/// Validate `value <= max` and return it shifted into place.
fn field(name: &'static str, value: u8, max: u8, shift: u32) -> Result<u32> {
    if value > max {
        return Err(Error::Address {
            field: name,
            value: u32::from(value),
            min: 0,
            max: u32::from(max),
        });
    }
    Ok(u32::from(value) << shift)
}

/// Cartridge index, 0..=9, bits 12..=15.
pub fn cartridge(cart: u8) -> Result<u32> {
    field("cartridge", cart, 9, 12)
}

/// Polarization channel, 0 or 1, bit 10.
pub fn polarization(pol: u8) -> Result<u32> {
    field("polarization", pol, 1, 10)
}

/// Sideband, 0 or 1, bit 7.
pub fn sideband(sb: u8) -> Result<u32> {
    field("sideband", sb, 1, 7)
}

/// LNA stage, 0..=5, stride 4 (three monitor points per stage).
pub fn lna_stage(stage: u8) -> Result<u32> {
    field("lna_stage", stage, 5, 2)
}

/// DAC index, 0 or 1, stride 8.
pub fn dac(index: u8) -> Result<u32> {
    field("dac", index, 1, 3)
}

/// PA channel, 0 or 1, stride 8.
pub fn pa_channel(channel: u8) -> Result<u32> {
    field("pa_channel", channel, 1, 3)
}

/// Cartridge temperature sensor index, 0..=6, stride 4.
pub fn cartridge_temp(sensor: u8) -> Result<u32> {
    field("cartridge_temp", sensor, 6, 2)
}

/// Power distribution module, 0..=9, stride 0x40.
pub fn pd_module(module: u8) -> Result<u32> {
    field("pd_module", module, 9, 6)
}

/// Power distribution channel, 0..=6, stride 8.
pub fn pd_channel(channel: u8) -> Result<u32> {
    field("pd_channel", channel, 6, 3)
}

/// Structured address of one SIS mixer (or its magnet/LNA block).
///
/// Encoding and decoding are exact inverses for all in-range tuples,
/// which the round-trip tests rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerAddress {
    /// Cartridge index, 0..=9.
    pub cartridge: u8,
    /// Polarization channel, 0 or 1.
    pub polarization: u8,
    /// Sideband, 0 or 1.
    pub sideband: u8,
}

impl MixerAddress {
    /// Encode into the mixer's base offset (no point offset applied).
    pub fn encode(&self) -> Result<u32> {
        Ok(cartridge(self.cartridge)?
            | polarization(self.polarization)?
            | sideband(self.sideband)?)
    }

    /// Decode a standard-space RCA back into its mixer coordinates.
    pub fn decode(rca: u32) -> Result<Self> {
        let cart = ((rca >> 12) & 0xF) as u8;
        if cart > 9 {
            return Err(Error::Address {
                field: "cartridge",
                value: u32::from(cart),
                min: 0,
                max: 9,
            });
        }
        Ok(MixerAddress {
            cartridge: cart,
            polarization: ((rca >> 10) & 1) as u8,
            sideband: ((rca >> 7) & 1) as u8,
        })
    }
}

/// Structured address of one power distribution channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdAddress {
    /// Module index, 0..=9.
    pub module: u8,
    /// Channel index, 0..=6.
    pub channel: u8,
}

impl PdAddress {
    /// Encode into the channel's base offset within the PD block.
    pub fn encode(&self) -> Result<u32> {
        Ok(POWER_DISTRIBUTION | pd_module(self.module)? | pd_channel(self.channel)?)
    }

    /// Decode a PD-block RCA back into its module/channel coordinates.
    pub fn decode(rca: u32) -> Result<Self> {
        let offset = rca & !POWER_DISTRIBUTION;
        let module = ((offset >> 6) & 0xF) as u8;
        let channel = ((offset >> 3) & 0x7) as u8;
        if module > 9 {
            return Err(Error::Address {
                field: "pd_module",
                value: u32::from(module),
                min: 0,
                max: 9,
            });
        }
        if channel > 6 {
            return Err(Error::Address {
                field: "pd_channel",
                value: u32::from(channel),
                min: 0,
                max: 6,
            });
        }
        Ok(PdAddress { module, channel })
    }
}
