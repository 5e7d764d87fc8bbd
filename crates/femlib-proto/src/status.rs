//! Device status-byte taxonomy.
//!
//! Monitor replies and control acknowledgements carry a trailing signed
//! status byte. Zero means success; negative values are the device's fixed
//! error table. Two of the codes are warnings: the exchange succeeded but
//! the value deserves attention, so the engine logs them and carries on.

use femlib_core::{Error, Result};

/// A decoded device status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// 0: no error.
    Ok,
    /// -1: communication with the addressed module failed.
    CommFailed,
    /// -2: the addressed hardware is not installed.
    HardwareAbsent,
    /// -3: the operation is restricted by manufacturer directive.
    Restricted,
    /// -4: hardware properties are under-specified (warning).
    UnderSpecified,
    /// -5: analog conversion error.
    ConversionError,
    /// -6: the readout had to be retried (warning).
    ReadoutRetry,
    /// -7: the hardware is in an error state.
    HardwareError,
    /// -10 / -13: the monitored value is in its error range.
    ValueInErrorRange,
    /// -11 / -14: the monitored value is in its warning range.
    ValueInWarningRange,
    /// -12: the RCA is not defined on this device.
    UndefinedAddress,
    /// -15: the feature is not implemented in this firmware.
    Unimplemented,
    /// Any other negative code the firmware may produce.
    Unknown(i8),
}

impl DeviceStatus {
    /// Decode a raw status byte.
    pub fn from_byte(code: i8) -> Self {
        match code {
            0 => DeviceStatus::Ok,
            -1 => DeviceStatus::CommFailed,
            -2 => DeviceStatus::HardwareAbsent,
            -3 => DeviceStatus::Restricted,
            -4 => DeviceStatus::UnderSpecified,
            -5 => DeviceStatus::ConversionError,
            -6 => DeviceStatus::ReadoutRetry,
            -7 => DeviceStatus::HardwareError,
            -10 | -13 => DeviceStatus::ValueInErrorRange,
            -11 | -14 => DeviceStatus::ValueInWarningRange,
            -12 => DeviceStatus::UndefinedAddress,
            -15 => DeviceStatus::Unimplemented,
            other => DeviceStatus::Unknown(other),
        }
    }

    /// `true` for codes that indicate success with a caveat.
    ///
    /// Warnings are logged by the engine and treated as success; true
    /// errors abort the operation.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            DeviceStatus::UnderSpecified
                | DeviceStatus::ReadoutRetry
                | DeviceStatus::ValueInWarningRange
        )
    }

    /// Human-readable meaning, used in error messages and log lines.
    pub fn description(&self) -> &'static str {
        match self {
            DeviceStatus::Ok => "no error",
            DeviceStatus::CommFailed => "communication failure",
            DeviceStatus::HardwareAbsent => "hardware absent",
            DeviceStatus::Restricted => "restricted by manufacturer directive",
            DeviceStatus::UnderSpecified => "hardware properties under-specified",
            DeviceStatus::ReadoutRetry => "readout retried",
            DeviceStatus::ConversionError => "conversion error",
            DeviceStatus::HardwareError => "hardware error state",
            DeviceStatus::ValueInErrorRange => "value in error range",
            DeviceStatus::ValueInWarningRange => "value in warning range",
            DeviceStatus::UndefinedAddress => "undefined address",
            DeviceStatus::Unimplemented => "feature not implemented",
            DeviceStatus::Unknown(_) => "unknown status code",
        }
    }

    /// Interpret a status byte at the given RCA.
    ///
    /// `Ok` and warnings return `Ok(())` (warnings are logged at `warn`);
    /// everything else becomes [`Error::HardwareFault`] carrying the RCA,
    /// the raw code, and the decoded meaning.
    pub fn check(code: i8, rca: u32) -> Result<()> {
        let status = DeviceStatus::from_byte(code);
        if status == DeviceStatus::Ok {
            return Ok(());
        }
        if status.is_warning() {
            tracing::warn!(rca = format_args!("{rca:#07x}"), code, meaning = status.description(),
                "device warning on reply");
            return Ok(());
        }
        Err(Error::HardwareFault {
            rca,
            code,
            status: status.description(),
        })
    }
}
