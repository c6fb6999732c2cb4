//! Attribute Protocol (ATT) definitions
//!
//! The Hearing Access profile does not implement an ATT bearer itself; this
//! module only carries the error codes, configuration values and security
//! levels that cross the boundary to the bearer.

pub mod constants;
pub mod error;
pub mod types;

pub use self::constants::*;
pub use self::error::{AttErrorCode, AttResult};
pub use self::types::SecurityLevel;
