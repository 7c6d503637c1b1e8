//! FUSE filesystem implementation.
//!
//! The filesystem has exactly one inode — the root, which is a regular
//! file.  `getattr` answers from configuration alone; `read` renders fresh
//! content by invoking the store command for whichever facets the layout
//! names, then substituting them into the layout template.
//!
//! `Filesystem` in fuser 0.17 takes `&self` and its callbacks are
//! synchronous; retrievals bridge into the binary's tokio runtime through a
//! captured [`tokio::runtime::Handle`].  Concurrent reads each spawn their
//! own subprocess, so the node holds no mutable state at all.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context as _;
use fuser::{
    AccessFlags, BackgroundSession, Config, Errno, FileAttr, FileHandle, FileType, Filesystem,
    FopenFlags, INodeNo, LockOwner, MountOption, OpenFlags, ReplyAttr, ReplyData, ReplyEmpty,
    ReplyOpen, ReplyStatfs, Request, SessionACL,
};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use passfile_core::retrieve::{OTP_OP, PASSWORD_OP, RetrieveError, Retriever};
use passfile_core::{Secret, layout};

/// The filesystem's only inode.
const INO_FILE: u64 = 1;

/// Nominal size reported by `getattr` before any read has happened.
///
/// This is a fixed value, deliberately unrelated to the true rendered
/// length: clients that size their buffers from attributes get a generous
/// number, and the offset/size slicing in `read` is authoritative for
/// content that is shorter or longer.
pub const NOMINAL_SIZE: u64 = 1 << 10;

/// Attribute cache TTL handed to the kernel.
const TTL: Duration = Duration::from_secs(1);

/// The single virtual file backed by the password store.
pub struct SecretFile {
    uid: u32,
    gid: u32,
    /// Store entry name, e.g. `mail/alice`.  Opaque to us.
    pass_name: String,
    /// Layout template; see [`passfile_core::layout`].
    layout: String,
    retriever: Retriever,
    runtime: tokio::runtime::Handle,
    mounted_at: SystemTime,
}

impl SecretFile {
    pub fn new(
        uid: u32,
        gid: u32,
        pass_name: String,
        layout: String,
        retriever: Retriever,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            uid,
            gid,
            pass_name,
            layout,
            retriever,
            runtime,
            mounted_at: SystemTime::now(),
        }
    }

    /// Read-only, owner-only, fixed nominal size.  Never fails.
    fn attr(&self) -> FileAttr {
        FileAttr {
            ino: INodeNo(INO_FILE),
            size: NOMINAL_SIZE,
            blocks: NOMINAL_SIZE.div_ceil(512),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind: FileType::RegularFile,
            perm: 0o400,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    /// Fetch the facets the layout names (password first, then otp) and
    /// render the template.
    ///
    /// The first failed retrieval aborts the read — a partial render is
    /// never returned.  A layout with no tokens never spawns the command.
    pub async fn read_all(&self) -> Result<Zeroizing<String>, RetrieveError> {
        let mut password = Secret::empty();
        let mut otp = Secret::empty();

        if layout::wants_password(&self.layout) {
            password = self.retriever.retrieve(PASSWORD_OP, &self.pass_name).await?;
        }
        if layout::wants_otp(&self.layout) {
            otp = self.retriever.retrieve(OTP_OP, &self.pass_name).await?;
        }

        Ok(layout::render(&self.layout, password.as_str(), otp.as_str()))
    }
}

impl Filesystem for SecretFile {
    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        if ino.0 == INO_FILE {
            reply.attr(&TTL, &self.attr());
        } else {
            reply.error(Errno::ENOENT);
        }
    }

    fn access(&self, _req: &Request, ino: INodeNo, _mask: AccessFlags, reply: ReplyEmpty) {
        // The kernel enforces permissions (SessionACL::Owner plus 0o400);
        // only the inode needs checking here.
        if ino.0 == INO_FILE {
            reply.ok();
        } else {
            reply.error(Errno::ENOENT);
        }
    }

    fn open(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        if ino.0 == INO_FILE {
            reply.opened(FileHandle(0), FopenFlags::empty());
        } else {
            reply.error(Errno::ENOENT);
        }
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        if ino.0 != INO_FILE {
            reply.error(Errno::ENOENT);
            return;
        }
        debug!(offset, size, "fuse read");
        let content = match self.runtime.block_on(self.read_all()) {
            Ok(content) => content,
            Err(e) => {
                // Sole place a retrieval failure is reported to the operator.
                warn!(pass_name = %self.pass_name, error = %e, "secret retrieval failed");
                reply.error(Errno::EIO);
                return;
            }
        };
        let bytes = content.as_bytes();
        let start = (offset as usize).min(bytes.len());
        let end = (start + size as usize).min(bytes.len());
        reply.data(&bytes[start..end]);
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        // One virtual file, read-only, nothing free.
        reply.statfs(0, 0, 0, 1, 0, 4096, 255, 0);
    }
}

/// A handle to the mounted filesystem.
///
/// [`MountHandle::unmount`] performs the orderly teardown.  If the handle is
/// instead dropped (panic, early error return), `Drop` falls back to a lazy
/// `fusermount3 -uz` so a stale mount is not left behind.
pub struct MountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl std::fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountHandle")
            .field("mountpoint", &self.mountpoint)
            .finish_non_exhaustive()
    }
}

impl MountHandle {
    /// Unmount, then close the session — strictly in that order.
    ///
    /// A failed unmount (mountpoint busy) is returned as an error without
    /// touching the session: a stale mount must surface to the operator,
    /// not be papered over.  After a successful unmount the serve loop sees
    /// the kernel disconnect and exits; joining it closes `/dev/fuse`.
    pub fn unmount(mut self) -> anyhow::Result<()> {
        let mountpoint = self.mountpoint.clone();
        let session = self.session.take();
        unmount_then_close(|| detach_mount(FUSERMOUNT, &mountpoint), move || drop(session))
    }
}

const FUSERMOUNT: &str = "fusermount3";

/// Ask the kernel to detach the mount via `<program> -u <mountpoint>`.
///
/// A non-zero exit (typically "Device or resource busy") is returned with
/// the tool's stderr attached.
fn detach_mount(program: &str, mountpoint: &Path) -> anyhow::Result<()> {
    let output = std::process::Command::new(program)
        .args(["-u", mountpoint.to_string_lossy().as_ref()])
        .output()
        .with_context(|| format!("run {program}"))?;
    if !output.status.success() {
        anyhow::bail!(
            "unmount {:?}: {}",
            mountpoint,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Teardown ordering for the mount lifecycle.
///
/// `detach` runs first; only when it succeeds is `close` reached.  A failed
/// detach leaves the session alone and surfaces as the returned error — a
/// mount left behind without a living connection is the worse failure mode.
fn unmount_then_close(
    detach: impl FnOnce() -> anyhow::Result<()>,
    close: impl FnOnce(),
) -> anyhow::Result<()> {
    detach()?;
    close();
    Ok(())
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            let _ = std::process::Command::new("fusermount3")
                .args(["-uz", self.mountpoint.to_string_lossy().as_ref()])
                .output();
        }
    }
}

/// Mount the secret file at `mountpoint` and return a [`MountHandle`].
///
/// The mount is read-only and restricted to the owner
/// (`SessionACL::Owner`).  Because the root node is a regular file the
/// mountpoint must be a file too; it is created empty if missing.
pub fn mount(mountpoint: &Path, file: SecretFile) -> anyhow::Result<MountHandle> {
    // Clean up any stale mount from a previous crashed instance.  Lazy
    // unmount fails harmlessly when nothing is mounted, so the exit status
    // is ignored.
    let _ = std::process::Command::new("fusermount3")
        .args(["-uz", mountpoint.to_string_lossy().as_ref()])
        .output();

    if !mountpoint.exists() {
        std::fs::File::create(mountpoint)
            .with_context(|| format!("create mountpoint {:?}", mountpoint))?;
    }

    let mut config = Config::default();
    config.mount_options = vec![
        MountOption::RO,
        MountOption::FSName("passfile".to_string()),
        MountOption::Subtype("passfile".to_string()),
    ];
    config.acl = SessionACL::Owner;

    let session = fuser::spawn_mount2(file, mountpoint, &config)
        .with_context(|| format!("mount passfile at {:?}", mountpoint))?;

    Ok(MountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    })
}
