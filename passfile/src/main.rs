//! passfile — mount one password-store entry as a read-only virtual file.
//!
//! Any process that can read the mounted file obtains the rendered secret;
//! every read re-invokes the store command, so nothing is ever cached in
//! this process.  Lifecycle: mount, serve on the FUSE background thread,
//! block on SIGINT/SIGTERM, then unmount before closing the session.

mod cli;

use anyhow::Result;
use tracing::info;

use passfile_core::retrieve::{DEFAULT_TIMEOUT, Retriever};
use passfile_fuse::SecretFile;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let opts = cli::parse();

    // The file is owned by the invoking user; together with mode 0400 and
    // SessionACL::Owner nobody else can read it.
    // SAFETY: getuid/getgid cannot fail and take no arguments.
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    let retriever = Retriever::new(opts.pass_cmd.clone(), DEFAULT_TIMEOUT);
    let file = SecretFile::new(
        uid,
        gid,
        opts.pass_name.clone(),
        opts.layout.clone(),
        retriever,
        tokio::runtime::Handle::current(),
    );

    let handle = passfile_fuse::mount(&opts.mountpoint, file)?;
    info!(
        mountpoint = %opts.mountpoint.display(),
        pass_name = %opts.pass_name,
        layout = %opts.layout,
        "mounted"
    );

    shutdown_signal().await;
    info!("received shutdown signal, unmounting");

    // Unmount-before-close; a busy mountpoint surfaces as a fatal error.
    handle.unmount()?;
    Ok(())
}

/// Wait for ctrl-c (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}, falling back to SIGINT only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
