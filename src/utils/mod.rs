//! Utility functions for report runs.
//!
//! ## Components
//!
//! - **Hashing**: SHA-256 of resolved evidence files
//! - **Manifest**: the machine-readable run record
//!
//! ### Hashing a Source File
//!
//! ```no_run
//! use rust_artifact_report::utils::hash::calculate_sha256;
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let path = Path::new("/evidence/fs/System/Library/CoreServices/SystemVersion.plist");
//! match calculate_sha256(path, 512)? {
//!     Some(hash) => println!("SHA-256: {}", hash),
//!     None => println!("File exceeds size limit"),
//! }
//! # Ok(())
//! # }
//! ```

/// Cryptographic hash calculation utilities
pub mod hash;

/// Run manifest model and writer
pub mod manifest;
