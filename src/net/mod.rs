//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Caller datagram (127.0.0.1:<base_port + shard>)
//!     → codec.rs (JSON decode, tagged by "type")
//!     → udp.rs (dispatch to the owning registry shard)
//!     → codec.rs (encode reply) → send back to the caller's address
//! ```
//!
//! # Design Decisions
//! - One socket per shard; callers pick the port by `(modid + cmdid) % N`
//! - Requests are dispatched by key, so a misrouted caller still gets answers
//! - Reports are one-way; undecodable datagrams are dropped

pub mod codec;
pub mod udp;

pub use codec::{Request, Response, RetCode};
pub use udp::UdpFrontend;
