//! Core secret-retrieval pipeline for passfile.
//!
//! A retrieval runs the external password-store command, keeps only the
//! first line of its stdout, and merges the result into a layout template:
//!
//! ```text
//! pass show <name> ──┐
//!                    ├──> FirstLineWriter ──> Secret ──> layout::render
//! pass otp show <..> ┘
//! ```
//!
//! Nothing in this crate touches the filesystem protocol — that lives in
//! `passfile-fuse`.  Nothing here is cached: every render re-invokes the
//! store command.

use zeroize::Zeroizing;

pub mod firstline;
pub mod layout;
pub mod retrieve;

/// One retrieved secret value — the first line of a store command's stdout.
///
/// The backing buffer is scrubbed on drop and never printed by `Debug`.
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    pub fn empty() -> Self {
        Self(Zeroizing::new(String::new()))
    }

    /// Build from raw command output.  The store command speaks text; any
    /// invalid UTF-8 is replaced rather than rejected.  The input buffer is
    /// zeroized before this returns.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let bytes = Zeroizing::new(bytes);
        Self(Zeroizing::new(String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([redacted])")
    }
}
