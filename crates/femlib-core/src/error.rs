//! Error types for femlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! controller-layer errors are all captured here so that callers can
//! pattern-match on the failure mode (retune at a different level, give up,
//! or flag the hardware) without string matching.

/// The error type for all femlib operations.
///
/// Variants cover the full range of failure modes encountered when
/// monitoring and controlling a cartridge over the bus: physical transport
/// failures, malformed envelopes, reply timeouts, device-reported faults,
/// and tuning-procedure failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (bus adapter socket, gateway TCP/UDP, relay).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed envelope, bad length, bad payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An address field was out of its valid range. Caught before any I/O.
    #[error("address field {field}={value} outside [{min}, {max}]")]
    Address {
        /// The offending field name (e.g. "polarization").
        field: &'static str,
        /// The value that was supplied.
        value: u32,
        /// Inclusive lower bound of the valid interval.
        min: u32,
        /// Inclusive upper bound of the valid interval.
        max: u32,
    },

    /// Timed out waiting for any frame from the bus.
    #[error("timeout waiting for reply")]
    Timeout,

    /// The read loop exhausted its attempt budget without seeing a reply
    /// whose address matches the request.
    #[error("no matching reply for RCA {rca:#07x} after {attempts} attempts")]
    NoMatchingReply {
        /// The monitor RCA we were waiting on.
        rca: u32,
        /// How many frames were read and discarded.
        attempts: u32,
    },

    /// The device reported a fault through its trailing status byte.
    #[error("hardware fault at RCA {rca:#07x}: {status} (code {code})")]
    HardwareFault {
        /// The RCA of the failing exchange.
        rca: u32,
        /// The raw signed status byte.
        code: i8,
        /// Decoded meaning of the status byte.
        status: &'static str,
    },

    /// A commanded value was not reflected on readback after the retry budget.
    #[error(
        "verification failed at RCA {rca:#07x}: commanded {commanded:02X?}, read back {readback:02X?}"
    )]
    VerificationFailed {
        /// The control RCA that was written.
        rca: u32,
        /// The bytes that were commanded.
        commanded: Vec<u8>,
        /// The bytes that came back on the verify monitor.
        readback: Vec<u8>,
    },

    /// The PLL could not be locked, or an established lock was lost
    /// (unlock latch observed, or search window exhausted).
    #[error("PLL lock lost: {0}")]
    LockLost(String),

    /// A bias ramp readback mismatch survived its bounded retries.
    ///
    /// This models the known failure mode where an unrelated command
    /// corrupts an adjacent channel's bias register; the mixer may have
    /// trapped flux and should be defluxed before retuning.
    #[error("trapped flux suspected: pol {polarization} sb {sideband}: commanded {commanded} mV, read {readback} mV")]
    TrappedFluxSuspected {
        /// Polarization channel of the failing mixer.
        polarization: u8,
        /// Sideband of the failing mixer.
        sideband: u8,
        /// Target bias in millivolts.
        commanded: f32,
        /// What the device reported after the final ramp attempt.
        readback: f32,
    },

    /// An operation was attempted while the cartridge's power-distribution
    /// enable is off. Always fatal to that call.
    #[error("cartridge {0} power distribution is not enabled")]
    PowerDisabled(u8),

    /// The mixer-heating cooldown did not complete within its time budget.
    #[error("mixer temperature did not return below {baseline_k} K within {timeout_s} s")]
    CooldownFailed {
        /// Baseline temperature measured before heating, in kelvin.
        baseline_k: f32,
        /// The cooldown budget that was exceeded, in seconds.
        timeout_s: u64,
    },

    /// An invalid parameter was passed to an operation (e.g. an LO
    /// frequency outside the band's tuning range).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the bus has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the bus was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_address() {
        let e = Error::Address {
            field: "polarization",
            value: 3,
            min: 0,
            max: 1,
        };
        assert_eq!(e.to_string(), "address field polarization=3 outside [0, 1]");
    }

    #[test]
    fn error_display_no_matching_reply() {
        let e = Error::NoMatchingReply {
            rca: 0x10022,
            attempts: 10,
        };
        assert_eq!(
            e.to_string(),
            "no matching reply for RCA 0x10022 after 10 attempts"
        );
    }

    #[test]
    fn error_display_hardware_fault() {
        let e = Error::HardwareFault {
            rca: 0x00008,
            code: -7,
            status: "hardware error state",
        };
        assert!(e.to_string().contains("hardware error state"));
        assert!(e.to_string().contains("-7"));
    }

    #[test]
    fn error_display_verification_failed() {
        let e = Error::VerificationFailed {
            rca: 0x10008,
            commanded: vec![0x40, 0x00],
            readback: vec![0x3F, 0xFF],
        };
        assert!(e.to_string().contains("0x10008"));
    }

    #[test]
    fn error_display_lock_lost() {
        let e = Error::LockLost("window exhausted at coarse 2068".into());
        assert_eq!(e.to_string(), "PLL lock lost: window exhausted at coarse 2068");
    }

    #[test]
    fn error_display_power_disabled() {
        let e = Error::PowerDisabled(6);
        assert_eq!(e.to_string(), "cartridge 6 power distribution is not enabled");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
