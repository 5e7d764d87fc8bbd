//! Mock transport for deterministic testing of the protocol engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/reply pairs. This lets you test RCA encoding, readback
//! verification, and reply matching without real hardware.
//!
//! # Example
//!
//! ```
//! use femlib_test_harness::MockTransport;
//! use femlib_core::Frame;
//!
//! let mut mock = MockTransport::new();
//! // Pre-load: when the engine sends this request, return this reply.
//! mock.expect(
//!     Frame::request(0x06812),
//!     Frame::new(0x06812, &[0x07, 0xFF, 0x00]).unwrap(),
//! );
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use femlib_core::{Error, Frame, Result, Transport};

/// A pre-loaded request/reply pair.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact frame we expect to be sent.
    request: Frame,
    /// The frames to queue for `recv` when the request matches.
    replies: Vec<Frame>,
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the frame
/// is recorded and matched against the next expectation; that
/// expectation's replies are then queued for `recv()`. Unsolicited bus
/// chatter can be injected directly with [`inject`](MockTransport::inject).
///
/// If no expectation matches or the queue is exhausted, `send` errors.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Ordered queue of expected request/reply pairs.
    expectations: VecDeque<Expectation>,
    /// Frames pending for `recv()`.
    rx_queue: VecDeque<Frame>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all frames sent through this transport.
    sent_log: Vec<Frame>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            rx_queue: VecDeque::new(),
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Add an expected request with a single reply.
    pub fn expect(&mut self, request: Frame, reply: Frame) {
        self.expect_many(request, vec![reply]);
    }

    /// Add an expected request with zero or more replies.
    ///
    /// Useful for simulating bus chatter ahead of the real reply, or a
    /// device that never answers (empty reply list).
    pub fn expect_many(&mut self, request: Frame, replies: Vec<Frame>) {
        self.expectations.push_back(Expectation { request, replies });
    }

    /// Queue an unsolicited frame, as if another node spoke on the bus.
    pub fn inject(&mut self, frame: Frame) {
        self.rx_queue.push_back(frame);
    }

    /// All frames that have been sent through this transport, in order.
    pub fn sent_frames(&self) -> &[Frame] {
        &self.sent_log
    }

    /// The number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state. When `false`, `send` and `recv` return
    /// [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent_log.push(frame.clone());

        let Some(expectation) = self.expectations.pop_front() else {
            return Err(Error::Protocol(format!(
                "no more expectations in mock transport, got {frame}"
            )));
        };
        if *frame != expectation.request {
            return Err(Error::Protocol(format!(
                "unexpected frame: expected {}, got {frame}",
                expectation.request
            )));
        }
        self.rx_queue.extend(expectation.replies);
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

    #[tokio::test]
    async fn expectations_consumed_in_order() {
        let mut mock = MockTransport::new();
        mock.expect(
            Frame::request(0x06812),
            Frame::new(0x06812, &[0x07, 0xFF, 0x00]).unwrap(),
        );
        mock.expect(
            Frame::request(0x06800),
            Frame::new(0x06800, &[0x40, 0x80, 0x00, 0x00, 0x00]).unwrap(),
        );

        mock.send(&Frame::request(0x06812)).await.unwrap();
        let reply = mock.recv(Duration::from_millis(10)).await.unwrap();
        assert_eq!(reply.rca(), 0x06812);

        mock.send(&Frame::request(0x06800)).await.unwrap();
        let reply = mock.recv(Duration::from_millis(10)).await.unwrap();
        assert_eq!(reply.rca(), 0x06800);

        assert_eq!(mock.remaining_expectations(), 0);
        assert_eq!(mock.sent_frames().len(), 2);
    }

    #[tokio::test]
    async fn mismatched_request_is_an_error() {
        let mut mock = MockTransport::new();
        mock.expect(Frame::request(0x06812), Frame::new(0x06812, &[0x00]).unwrap());

        let result = mock.send(&Frame::request(0x06800)).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn exhausted_expectations_is_an_error() {
        let mut mock = MockTransport::new();
        let result = mock.send(&Frame::request(0x1)).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn injected_frames_arrive_before_replies() {
        let mut mock = MockTransport::new();
        mock.inject(Frame::new(0x0AAAA, &[0xFF]).unwrap());
        mock.expect(Frame::request(0x06812), Frame::new(0x06812, &[0x01]).unwrap());

        mock.send(&Frame::request(0x06812)).await.unwrap();
        let first = mock.recv(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.rca(), 0x0AAAA);
        let second = mock.recv(Duration::from_millis(10)).await.unwrap();
        assert_eq!(second.rca(), 0x06812);
    }

    #[tokio::test]
    async fn drain_clears_pending_frames() {
        let mut mock = MockTransport::new();
        mock.inject(Frame::new(0x1, &[0x01]).unwrap());
        mock.drain().await;
        assert!(matches!(
            mock.recv(Duration::from_millis(10)).await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn disconnected_transport_errors() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);
        assert!(matches!(
            mock.send(&Frame::request(0x1)).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            mock.recv(Duration::from_millis(10)).await,
            Err(Error::NotConnected)
        ));
    }
}
