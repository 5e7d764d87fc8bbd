//! Bus protocol layer: wire envelopes, RCA addressing, status decoding,
//! and the request/reply engine with its typed command catalogue.
//!
//! The layering is strict. [`frame`] and [`rca`] are pure codecs with no
//! I/O; [`engine`] owns a transport and runs one exchange at a time;
//! [`commands`] names every hardware point so higher layers never touch a
//! raw address.

pub mod commands;
pub mod engine;
pub mod frame;
pub mod rca;
pub mod status;

pub use commands::points;
pub use engine::{Engine, DEFAULT_TIMEOUT};
pub use rca::{MixerAddress, PdAddress};
pub use status::DeviceStatus;
