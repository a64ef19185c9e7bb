//! Common utilities and types

pub mod error;
pub mod metadata;
pub mod net;
pub mod single;
pub mod socks;

pub use error::{Error, Result};
pub use metadata::{addr_to_metadata, Metadata, Network};
pub use net::{Address, NetLocation};
pub use single::Single;
