//! Client side of the system-controller message protocol.
//!
//! Layers, bottom up:
//!
//! - [`transport`] and [`env`]: the secure proxy and clock, as traits.
//! - [`transaction`]: sequence allocation and response routing, no I/O.
//! - [`channel`]: blocking request/response on top of the two.
//! - [`version`] and [`dkek`]: the version query and derived-key request.
//! - [`platform`]: boot-time context producing the hardware unique key.
//!
//! All calls block the calling thread. A [`Channel`] may be shared between
//! threads; each thread drives its own transactions.
#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod dkek;
pub mod env;
pub mod error;
pub mod platform;
pub mod sensitive;
pub mod transaction;
pub mod transport;
pub mod version;

pub use channel::{Channel, Transaction};
pub use config::{ChannelConfig, DEFAULT_HOST_ID, KeyDerivationConfig, PlatformConfig};
pub use dkek::{KeyDerivationClient, SUPPORTED_SA2UL_INSTANCE};
pub use env::{Environment, SystemEnv};
pub use error::{KeyDerivationError, PlatformError, ProtocolError};
pub use platform::Platform;
pub use sensitive::{DerivedKey, HwUniqueKey, WipeOnDrop};
pub use transaction::{Disposition, TransactionId, TransactionState, TransactionTable};
pub use transport::{DEFAULT_MAX_MESSAGE_SIZE, ProxyThread, SecureProxy, TransportError};
pub use version::{AbiVersion, VersionInfo, VersionNegotiator};
