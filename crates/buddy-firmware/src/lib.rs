//! Buddy-Firmware: bundle cache and target extraction
//!
//! A firmware bundle is a zip archive holding one compiled binary per
//! hardware target, usually with a `fw.json` manifest naming them. This
//! crate turns `(bundle url, target code)` into binary bytes and keeps
//! user-uploaded firmware for the session.
//!
//! ## Key Components
//!
//! - `FirmwareStore`: per-url bundle cache with in-flight de-duplication,
//!   memoised binaries and the local firmware registry
//! - `ArchiveSource`: where bundle bytes come from (HTTP in production)
//! - `FirmwareBundle`: a parsed archive and its target manifest
//! - `fakes`: in-memory archive source and a bundle builder

pub mod bundle;
mod error;
pub mod fakes;
pub mod local;
pub mod source;
pub mod store;

pub use bundle::{FirmwareBundle, TargetDescriptor, MANIFEST_FILE};
pub use error::FirmwareError;
pub use local::{LocalFirmware, LocalFirmwareRegistry};
pub use source::ArchiveSource;
pub use store::{FirmwareStore, StoreEvent, StoreStats};

/// Result type for firmware store operations
pub type Result<T> = std::result::Result<T, FirmwareError>;
