// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY ownership and nonblocking master-side I/O.
//!
//! Both the terminal sessions and the assistant adapter spawn their child
//! as the session leader of a fresh PTY via `forkpty` and pump the master
//! end through an [`AsyncFd`].

use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, Pid};
use serde::{Deserialize, Serialize};
use tokio::io::unix::AsyncFd;

use crate::error::GatewayError;

/// Newtype wrapper around `OwnedFd` for use with `AsyncFd`.
#[derive(Debug)]
struct PtyFd(OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for PtyFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ChildExit {
    /// Signal-kill during shutdown is a normal way for our children to go.
    pub fn is_signal_kill(&self) -> bool {
        matches!(self.signal, Some(s) if s == Signal::SIGKILL as i32 || s == Signal::SIGTERM as i32 || s == Signal::SIGHUP as i32)
    }
}

/// The master end of a PTY, readable and writable without blocking the
/// runtime.
#[derive(Debug)]
pub struct PtyMaster {
    afd: AsyncFd<PtyFd>,
}

impl PtyMaster {
    fn from_owned(fd: OwnedFd) -> Result<Self, GatewayError> {
        set_nonblocking(&fd).map_err(GatewayError::Io)?;
        let afd = AsyncFd::new(PtyFd(fd)).map_err(GatewayError::Io)?;
        Ok(Self { afd })
    }

    /// Read one chunk of whatever the child wrote.
    ///
    /// Returns `Ok(0)` on clean EOF; EIO from a PTY master means the slave
    /// side is gone and is mapped to EOF as well.
    pub async fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.afd.readable().await?;
            match guard.try_io(|inner| nix::unistd::read(inner, buf).map_err(io_err)) {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    /// Write the whole buffer to the child's input.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let mut guard = self.afd.writable().await?;
            match guard.try_io(|inner| {
                nix::unistd::write(&inner.get_ref().0, &data[offset..]).map_err(io_err)
            }) {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Turn off echo on the PTY line discipline.
    ///
    /// Used for the assistant's PTY, whose written input would otherwise
    /// come straight back through the output scanner.
    pub fn disable_echo(&self) -> Result<(), GatewayError> {
        use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};
        let fd = &self.afd.get_ref().0;
        let mut attrs = tcgetattr(fd).map_err(|e| GatewayError::Io(io_err(e)))?;
        attrs.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(fd, SetArg::TCSANOW, &attrs).map_err(|e| GatewayError::Io(io_err(e)))?;
        Ok(())
    }

    /// Set the window size on the PTY.
    // TIOCSWINSZ requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    pub fn set_winsize(&self, rows: u16, cols: u16) -> Result<(), GatewayError> {
        let ws = Winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ is a well-defined ioctl on a PTY master fd and
        // the Winsize struct is fully initialized.
        let ret = unsafe { libc::ioctl(self.afd.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            return Err(GatewayError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }
}

/// A child process attached to a fresh PTY as its session leader.
#[derive(Debug)]
pub struct PtyChild {
    pub master: PtyMaster,
    pub pid: Pid,
}

/// Spawn `command` on a new PTY.
///
/// The child becomes the controlling-terminal leader of a new session with
/// its stdio wired to the slave end. `command` must be non-empty.
// forkpty requires unsafe: the post-fork child is partially initialized
#[allow(unsafe_code)]
pub fn spawn(
    command: &[String],
    workdir: Option<&Path>,
    env: &[(String, String)],
    rows: u16,
    cols: u16,
) -> Result<PtyChild, GatewayError> {
    if command.is_empty() {
        return Err(GatewayError::SpawnFailed("empty command".to_owned()));
    }

    let winsize = Winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };

    // SAFETY: forkpty is unsafe because the child is in a partially
    // initialized state after fork. The child branch only calls
    // async-signal-tolerable setup before exec.
    let result = unsafe { forkpty(&winsize, None) }
        .map_err(|e| GatewayError::PtyAllocFailed(e.to_string()))?;

    match result {
        ForkptyResult::Child => {
            if let Some(dir) = workdir {
                let _ = std::env::set_current_dir(dir);
            }
            std::env::set_var("TERM", "xterm-256color");
            for (key, value) in env {
                std::env::set_var(key, value);
            }

            let c_args: Vec<CString> = command
                .iter()
                .filter_map(|s| CString::new(s.as_bytes()).ok())
                .collect();
            if c_args.len() == command.len() {
                let _ = execvp(&c_args[0], &c_args);
            }
            // exec failed; nothing sensible to do in the forked child.
            std::process::exit(127);
        }
        ForkptyResult::Parent { child, master } => {
            let master = PtyMaster::from_owned(master)
                .map_err(|e| GatewayError::PtyAllocFailed(e.to_string()))?;
            Ok(PtyChild { master, pid: child })
        }
    }
}

/// Block until the child exits. Run on a blocking thread.
pub fn wait_for_exit(pid: Pid) -> anyhow::Result<ChildExit> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ChildExit { code: Some(code), signal: None })
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ChildExit { code: None, signal: Some(sig as i32) })
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => anyhow::bail!("waitpid failed: {e}"),
        }
    }
}

/// Best-effort signal delivery; ESRCH (already gone) is fine.
pub fn signal_child(pid: Pid, sig: Signal) {
    let _ = kill(pid, sig);
}

fn set_nonblocking(fd: &impl AsFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
