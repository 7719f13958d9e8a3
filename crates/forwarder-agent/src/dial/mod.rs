//! Dial protocol (§4.2): bridges one local kernel socket to one remote
//! kernel socket through a single overlay stream, for both TCP and UDP.

pub mod framing;
pub mod handler;
pub mod initiator;

pub use handler::DialHandler;
pub use initiator::{run_tcp_dialer, run_udp_dialer};
