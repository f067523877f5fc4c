//! Message bodies for the supported request/response pairs.

pub mod dkek;
pub mod version;

pub use dkek::{DkekRequest, DkekResponse, KDF_LABEL_AND_CONTEXT_LEN_MAX, SA2UL_DKEK_KEY_LEN};
pub use version::{FIRMWARE_DESCRIPTION_LEN, VersionRequest, VersionResponse};
