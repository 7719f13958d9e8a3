//! Ports pub/sub protocol (§4.4, §4.5): publisher-side broadcast of
//! registry snapshots, and subscriber-side frame reading feeding the
//! reconciler.

pub mod publisher;
pub mod subscriber;

pub use publisher::Publisher;
pub use subscriber::subscribe;
