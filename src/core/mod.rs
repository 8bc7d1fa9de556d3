//! Core deterministic primitives.
//!
//! Integer amounts, addresses, domain-separated hashing and block context.
//! Nothing in this module reads the system clock or an OS random source.

pub mod amount;
pub mod address;
pub mod hash;
pub mod block;

// Re-export core types
pub use amount::{Amount, ONE_TOKEN, BPS_DENOMINATOR, tokens, mul_div_floor, bps_of};
pub use address::Address;
pub use hash::{Digest32, DomainHasher};
pub use block::{BlockContext, BlockProducer};
