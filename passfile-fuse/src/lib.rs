//! FUSE frontend for passfile.
//!
//! Exposes one password-store entry as a single read-only virtual file: the
//! filesystem's root node *is* the file, and the filesystem is mounted over
//! a regular file rather than a directory.  Every read re-runs the store
//! command — nothing is cached.
//!
//! Call [`mount`] to start the background FUSE session.  The returned
//! [`MountHandle`] keeps the mount alive; call [`MountHandle::unmount`] for
//! an orderly teardown (unmount strictly before closing the session).

pub mod fs;

pub use fs::{MountHandle, NOMINAL_SIZE, SecretFile, mount};
