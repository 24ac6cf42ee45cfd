//! Shared network types: result codes and peer addresses.

mod address;
mod error;

pub use address::NetworkAddress;
pub use error::{Error, Result};
