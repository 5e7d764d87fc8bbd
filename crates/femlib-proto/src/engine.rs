//! The request/reply engine.
//!
//! Turns an RCA + optional payload into a transport write, and a transport
//! read into a typed value. Two primitives:
//!
//! - [`Engine::monitor`]: send a zero-length request, then read frames
//!   until one with the matching RCA and non-empty data arrives. Frames
//!   with the wrong RCA or empty data (echoes of outbound commands on the
//!   shared bus) are discarded silently, up to a bounded attempt count.
//! - [`Engine::control`]: send the command, immediately monitor the same
//!   RCA, and byte-compare the readback against what was commanded. The
//!   whole send+verify sequence retries up to the policy's attempt budget,
//!   upgrading an unreliable single exchange into an at-least-verified
//!   command. A device-reported error status aborts immediately.
//!
//! One engine instance holds one outstanding exchange at a time; the
//! `&mut self` receivers make that a compile-time guarantee.

use std::time::Duration;

use tracing::{debug, trace};

use femlib_core::{Error, Frame, Result, RetryPolicy, Transport};

use crate::status::DeviceStatus;

/// Default per-exchange reply timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// The request/reply engine. Owns the transport exclusively.
pub struct Engine {
    transport: Box<dyn Transport>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Engine {
    /// Create an engine over the given transport with the default timeout
    /// and retry policy.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_policy(transport, DEFAULT_TIMEOUT, RetryPolicy::default())
    }

    /// Create an engine with an explicit timeout and retry policy.
    pub fn with_policy(
        transport: Box<dyn Transport>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Engine {
            transport,
            timeout,
            retry,
        }
    }

    /// The retry policy in effect.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Close the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    /// Whether the underlying transport is connected.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Request the monitor point at `rca` and return its reply frame.
    pub async fn monitor(&mut self, rca: u32) -> Result<Frame> {
        self.transport.drain().await;
        self.transport.send(&Frame::request(rca)).await?;
        self.await_reply(rca).await
    }

    /// Read frames until one matches `rca` with non-empty data.
    async fn await_reply(&mut self, rca: u32) -> Result<Frame> {
        for _ in 0..self.retry.max_attempts {
            let frame = self.transport.recv(self.timeout).await?;
            if frame.rca() == rca && !frame.is_empty() {
                return Ok(frame);
            }
            // Wrong address, or the bus echo of an outbound command.
            trace!(
                want = format_args!("{rca:#07x}"),
                got = %frame,
                "discarding non-matching frame"
            );
        }
        Err(Error::NoMatchingReply {
            rca,
            attempts: self.retry.max_attempts,
        })
    }

    /// Send a command to `rca` and verify it by readback.
    ///
    /// The readback may carry a trailing status byte after the commanded
    /// bytes; warnings count as success, true errors abort without further
    /// retries. A value mismatch with no error status retries the whole
    /// exchange, surfacing [`Error::VerificationFailed`] once the attempt
    /// budget is spent.
    pub async fn control(&mut self, rca: u32, data: &[u8]) -> Result<()> {
        let command = Frame::new(rca, data)?;
        let mut last_readback: Vec<u8> = Vec::new();
        let mut last_err: Option<Error> = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                debug!(rca = format_args!("{rca:#07x}"), attempt, "control retry");
                tokio::time::sleep(self.retry.backoff).await;
            }

            self.transport.drain().await;
            self.transport.send(&command).await?;

            let reply = match self.monitor(rca).await {
                Ok(frame) => frame,
                Err(e @ (Error::Timeout | Error::NoMatchingReply { .. })) => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let readback = reply.data();
            if readback == data {
                return Ok(());
            }
            if readback.len() == data.len() + 1 {
                // Value plus trailing status byte. A true error aborts;
                // a warning (or ok) leaves only the value comparison.
                DeviceStatus::check(readback[data.len()] as i8, rca)?;
                if &readback[..data.len()] == data {
                    return Ok(());
                }
            }
            debug!(
                rca = format_args!("{rca:#07x}"),
                commanded = ?data,
                readback = ?readback,
                "readback mismatch"
            );
            last_readback = readback.to_vec();
            last_err = None;
        }

        match last_err {
            Some(e) => Err(e),
            None => Err(Error::VerificationFailed {
                rca,
                commanded: data.to_vec(),
                readback: last_readback,
            }),
        }
    }

    /// Strip and check the optional trailing status byte of a monitor reply.
    fn check_reply<'a>(rca: u32, data: &'a [u8], value_len: usize) -> Result<&'a [u8]> {
        if data.len() == value_len + 1 {
            DeviceStatus::check(data[value_len] as i8, rca)?;
        } else if data.len() != value_len {
            return Err(Error::Protocol(format!(
                "reply to RCA {rca:#07x} has {} bytes, expected {value_len} (+1 status)",
                data.len()
            )));
        }
        Ok(&data[..value_len])
    }

    /// Monitor an unsigned byte quantity.
    pub async fn get_u8(&mut self, rca: u32) -> Result<u8> {
        let frame = self.monitor(rca).await?;
        let value = Self::check_reply(rca, frame.data(), 1)?;
        Ok(value[0])
    }

    /// Monitor a big-endian unsigned 16-bit quantity.
    pub async fn get_u16(&mut self, rca: u32) -> Result<u16> {
        let frame = self.monitor(rca).await?;
        let value = Self::check_reply(rca, frame.data(), 2)?;
        Ok(u16::from_be_bytes([value[0], value[1]]))
    }

    /// Monitor a big-endian 32-bit float quantity.
    pub async fn get_f32(&mut self, rca: u32) -> Result<f32> {
        let frame = self.monitor(rca).await?;
        let value = Self::check_reply(rca, frame.data(), 4)?;
        Ok(f32::from_be_bytes([value[0], value[1], value[2], value[3]]))
    }

    /// Command an unsigned byte quantity, verified by readback.
    pub async fn set_u8(&mut self, rca: u32, value: u8) -> Result<()> {
        self.control(rca, &[value]).await
    }

    /// Command a big-endian unsigned 16-bit quantity, verified by readback.
    pub async fn set_u16(&mut self, rca: u32, value: u16) -> Result<()> {
        self.control(rca, &value.to_be_bytes()).await
    }

    /// Command a big-endian 32-bit float quantity, verified by readback.
    pub async fn set_f32(&mut self, rca: u32, value: f32) -> Result<()> {
        self.control(rca, &value.to_be_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Minimal scripted transport for engine tests.
    ///
    /// Replies are popped in order on every `recv`; an empty queue times
    /// out. `drain` leaves the queue untouched so tests can pre-load
    /// stale traffic the engine must discard.
    struct Scripted {
        replies: VecDeque<Frame>,
        sent: Vec<Frame>,
        connected: bool,
    }

    impl Scripted {
        fn new() -> Self {
            Scripted {
                replies: VecDeque::new(),
                sent: Vec::new(),
                connected: true,
            }
        }

        fn push_reply(&mut self, frame: Frame) {
            self.replies.push_back(frame);
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&mut self, frame: &Frame) -> Result<()> {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            self.sent.push(frame.clone());
            Ok(())
        }

        async fn recv(&mut self, _timeout: Duration) -> Result<Frame> {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            self.replies.pop_front().ok_or(Error::Timeout)
        }

        async fn drain(&mut self) {}

        async fn close(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(0),
        }
    }

    fn engine_with(scripted: Scripted, max_attempts: u32) -> Engine {
        Engine::with_policy(
            Box::new(scripted),
            Duration::from_millis(50),
            fast_policy(max_attempts),
        )
    }

    #[tokio::test]
    async fn monitor_returns_matching_reply() {
        let mut t = Scripted::new();
        t.push_reply(Frame::new(0x06008, &[0x3F, 0x80, 0x00, 0x00, 0x00]).unwrap());
        let mut engine = engine_with(t, 10);

        let frame = engine.monitor(0x06008).await.unwrap();
        assert_eq!(frame.rca(), 0x06008);
        assert_eq!(frame.data().len(), 5);
    }

    #[tokio::test]
    async fn monitor_discards_echoes_and_chatter() {
        let mut t = Scripted::new();
        // Echo of our own request (empty data), chatter from another RCA,
        // then the real reply.
        t.push_reply(Frame::request(0x06008));
        t.push_reply(Frame::new(0x07010, &[0x01]).unwrap());
        t.push_reply(Frame::new(0x06008, &[0x42, 0x00]).unwrap());
        let mut engine = engine_with(t, 10);

        let frame = engine.monitor(0x06008).await.unwrap();
        assert_eq!(frame.data(), &[0x42, 0x00]);
    }

    #[tokio::test]
    async fn monitor_exhausts_attempts() {
        let mut t = Scripted::new();
        for _ in 0..10 {
            t.push_reply(Frame::new(0x0AAAA, &[0x01]).unwrap());
        }
        let mut engine = engine_with(t, 10);

        let err = engine.monitor(0x06008).await.unwrap_err();
        match err {
            Error::NoMatchingReply { rca, attempts } => {
                assert_eq!(rca, 0x06008);
                assert_eq!(attempts, 10);
            }
            other => panic!("expected NoMatchingReply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn monitor_surfaces_timeout() {
        let t = Scripted::new();
        let mut engine = engine_with(t, 10);
        assert!(matches!(engine.monitor(0x1).await, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn control_succeeds_on_faithful_echo() {
        let mut t = Scripted::new();
        // Device reports the commanded value plus a zero status byte.
        t.push_reply(Frame::new(0x16008, &[0x40, 0x00, 0x00, 0x00, 0x00]).unwrap());
        let mut engine = engine_with(t, 10);

        engine.control(0x16008, &[0x40, 0x00, 0x00, 0x00]).await.unwrap();
    }

    #[tokio::test]
    async fn control_succeeds_without_status_byte() {
        let mut t = Scripted::new();
        t.push_reply(Frame::new(0x16010, &[0x01]).unwrap());
        let mut engine = engine_with(t, 10);
        engine.control(0x16010, &[0x01]).await.unwrap();
    }

    #[tokio::test]
    async fn control_mismatch_retries_exactly_n_then_fails() {
        let mut t = Scripted::new();
        // Every verify readback disagrees with the command.
        for _ in 0..3 {
            t.push_reply(Frame::new(0x16008, &[0x3F, 0xFF, 0x00, 0x00, 0x00]).unwrap());
        }
        let mut engine = engine_with(t, 3);

        let err = engine.control(0x16008, &[0x40, 0x00, 0x00, 0x00]).await.unwrap_err();
        match err {
            Error::VerificationFailed { rca, commanded, readback } => {
                assert_eq!(rca, 0x16008);
                assert_eq!(commanded, vec![0x40, 0x00, 0x00, 0x00]);
                assert_eq!(readback, vec![0x3F, 0xFF, 0x00, 0x00, 0x00]);
            }
            other => panic!("expected VerificationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn control_counts_sends_per_attempt() {
        let mut t = Scripted::new();
        for _ in 0..2 {
            t.push_reply(Frame::new(0x16008, &[0x00]).unwrap());
        }
        let mut engine = engine_with(t, 2);
        let _ = engine.control(0x16008, &[0x01]).await;
        // Each attempt is one command send plus one monitor request.
        // (The engine owns the transport, so inspect through a fresh one.)
        // Verified indirectly: two scripted replies were consumed.
        assert!(matches!(
            engine.monitor(0x16008).await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn control_hardware_error_aborts_without_retry() {
        let mut t = Scripted::new();
        // -7 = hardware error state on the first verify.
        t.push_reply(Frame::new(0x16008, &[0x01, (-7i8) as u8]).unwrap());
        // A second (would-be retry) reply that must never be consumed.
        t.push_reply(Frame::new(0x16008, &[0x01, 0x00]).unwrap());
        let mut engine = engine_with(t, 10);

        let err = engine.control(0x16008, &[0x01]).await.unwrap_err();
        match err {
            Error::HardwareFault { code, status, .. } => {
                assert_eq!(code, -7);
                assert_eq!(status, "hardware error state");
            }
            other => panic!("expected HardwareFault, got {other:?}"),
        }
        // The retry reply is still queued: the abort was immediate.
        let leftover = engine.monitor(0x16008).await.unwrap();
        assert_eq!(leftover.data(), &[0x01, 0x00]);
    }

    #[tokio::test]
    async fn control_warning_status_is_success() {
        let mut t = Scripted::new();
        // -6 = readout retried: a warning, not an error.
        t.push_reply(Frame::new(0x16008, &[0x01, (-6i8) as u8]).unwrap());
        let mut engine = engine_with(t, 10);
        engine.control(0x16008, &[0x01]).await.unwrap();
    }

    #[tokio::test]
    async fn control_all_timeouts_surfaces_timeout() {
        let t = Scripted::new();
        let mut engine = engine_with(t, 3);
        assert!(matches!(
            engine.control(0x16008, &[0x01]).await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn get_f32_parses_big_endian_with_status() {
        let mut t = Scripted::new();
        t.push_reply(Frame::new(0x06014, &[0x40, 0x90, 0x00, 0x00, 0x00]).unwrap());
        let mut engine = engine_with(t, 10);
        let v = engine.get_f32(0x06014).await.unwrap();
        assert_eq!(v, 4.5);
    }

    #[tokio::test]
    async fn get_f32_hardware_fault_from_status() {
        let mut t = Scripted::new();
        t.push_reply(Frame::new(0x06014, &[0x40, 0x90, 0x00, 0x00, (-2i8) as u8]).unwrap());
        let mut engine = engine_with(t, 10);
        assert!(matches!(
            engine.get_f32(0x06014).await,
            Err(Error::HardwareFault { code: -2, .. })
        ));
    }

    #[tokio::test]
    async fn get_u16_and_u8() {
        let mut t = Scripted::new();
        t.push_reply(Frame::new(0x06012, &[0x07, 0xFF, 0x00]).unwrap());
        t.push_reply(Frame::new(0x06010, &[0x01, 0x00]).unwrap());
        let mut engine = engine_with(t, 10);
        assert_eq!(engine.get_u16(0x06012).await.unwrap(), 0x07FF);
        assert_eq!(engine.get_u8(0x06010).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn wrong_reply_length_is_protocol_error() {
        let mut t = Scripted::new();
        t.push_reply(Frame::new(0x06014, &[0x01, 0x02]).unwrap());
        let mut engine = engine_with(t, 10);
        assert!(matches!(
            engine.get_f32(0x06014).await,
            Err(Error::Protocol(_))
        ));
    }
}
