//! # External Process Execution
//!
//! Every external command modforge runs (`git`, `s-nail`) goes through an
//! [`ExecContext`]. The context bundles the two pieces of process-wide state
//! that govern command execution:
//!
//! - **A counting limiter.** Each command holds one slot while it runs. The
//!   default capacity is twice the available parallelism, so the number of
//!   concurrent child processes stays bounded no matter how many mirrors or
//!   accounts are being worked on at once.
//! - **A shutdown lock.** Each command holds a shared read guard while it runs.
//!   [`ExecContext::shutdown`] takes the write guard, which is only granted
//!   once every running command has exited. The signal handler holds that
//!   guard until the process exits, so no child is abandoned halfway through
//!   a fetch or a rename.
//!
//! The context is created once at startup and passed by reference to every
//! component that spawns processes. Tests build one with a capacity of 1 to
//! force serialization.

use std::io::Write;
use std::num::NonZeroUsize;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Condvar, Mutex, PoisonError, RwLock, RwLockWriteGuard};

use log::{debug, error, trace};

use crate::error::{Error, Result};

/// Shared execution budget and shutdown coordination for external commands.
#[derive(Debug)]
pub struct ExecContext {
    shutdown: RwLock<()>,
    limiter: Limiter,
}

impl ExecContext {
    /// Creates a context whose limiter admits `capacity` concurrent commands.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            shutdown: RwLock::new(()),
            limiter: Limiter::new(capacity.max(1)),
        }
    }

    /// Creates a context sized to twice the available parallelism.
    pub fn from_available_parallelism() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(cpus * 2)
    }

    /// Maximum number of commands that may run at once.
    pub(crate) fn capacity(&self) -> usize {
        self.limiter.capacity
    }

    /// Number of commands currently holding a slot.
    pub(crate) fn in_flight(&self) -> usize {
        self.limiter.capacity - *self.limiter.lock()
    }

    /// Runs `exe` with `args` in `dir` and returns its standard output.
    pub fn run(&self, dir: &Path, exe: &str, args: &[&str]) -> Result<Vec<u8>> {
        self.run_with_stdin(dir, exe, args, None)
    }

    /// Like [`ExecContext::run`], additionally feeding `stdin` to the child.
    ///
    /// A spawn error or a non-zero exit status is logged together with the
    /// captured output and returned as [`Error::Command`].
    pub fn run_with_stdin(
        &self,
        dir: &Path,
        exe: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let mut cmd = Command::new(exe);
        cmd.args(args)
            .current_dir(dir)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Released in reverse order: the slot first, then the shutdown guard.
        let _running = self
            .shutdown
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let _slot = self.limiter.acquire();

        debug!(
            "Running command: exe={} args={:?} dir={}",
            exe,
            args,
            dir.display()
        );

        let output = cmd.spawn().and_then(|mut child| {
            let written = match (stdin, child.stdin.take()) {
                (Some(input), Some(mut pipe)) => pipe.write_all(input),
                _ => Ok(()),
            };
            // Reap the child even if it stopped reading early.
            let output = child.wait_with_output()?;
            written.map(|()| output)
        });

        let failure = |message: String, stdout: &[u8], stderr: &[u8]| {
            let stdout = String::from_utf8_lossy(stdout).into_owned();
            let stderr = String::from_utf8_lossy(stderr).into_owned();
            error!(
                "Command failed: exe={} args={:?} dir={} error={} stdout={:?} stderr={:?}",
                exe,
                args,
                dir.display(),
                message,
                stdout,
                stderr
            );
            Error::Command {
                exe: exe.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                dir: dir.display().to_string(),
                message,
                stdout,
                stderr,
            }
        };

        match output {
            Ok(output) if output.status.success() => {
                trace!("Command succeeded: exe={} args={:?}", exe, args);
                Ok(output.stdout)
            }
            Ok(output) => Err(failure(
                output.status.to_string(),
                &output.stdout,
                &output.stderr,
            )),
            Err(e) => Err(failure(e.to_string(), &[], &[])),
        }
    }

    /// Blocks until no command is running and prevents new ones from starting.
    ///
    /// Commands that try to start while the returned guard is alive wait for
    /// it to be dropped. The signal handler keeps it until the process exits.
    pub fn shutdown(&self) -> RwLockWriteGuard<'_, ()> {
        debug!("Waiting for all uninterruptible operations to finish");
        self.shutdown
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::from_available_parallelism()
    }
}

/// Counting semaphore guarding process spawns.
#[derive(Debug)]
struct Limiter {
    capacity: usize,
    available: Mutex<usize>,
    released: Condvar,
}

impl Limiter {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) -> Permit<'_> {
        let mut available = self.lock();
        while *available == 0 {
            available = self
                .released
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        Permit { limiter: self }
    }
}

struct Permit<'a> {
    limiter: &'a Limiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.limiter.lock() += 1;
        self.limiter.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_capacity_is_at_least_one() {
        assert_eq!(ExecContext::new(0).capacity(), 1);
        assert_eq!(ExecContext::new(3).capacity(), 3);
        assert!(ExecContext::from_available_parallelism().capacity() >= 2);
    }

    #[test]
    fn test_limiter_of_one_serializes() {
        let limiter = Arc::new(Limiter::new(1));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                std::thread::spawn(move || {
                    let _permit = limiter.acquire();
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(*limiter.lock(), 1);
    }

    #[test]
    fn test_permit_released_on_drop() {
        let limiter = Limiter::new(2);
        {
            let _a = limiter.acquire();
            let _b = limiter.acquire();
            assert_eq!(*limiter.lock(), 0);
        }
        assert_eq!(*limiter.lock(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_captures_stdout() {
        let ctx = ExecContext::new(1);
        let out = ctx
            .run(Path::new("."), "sh", &["-c", "printf hello"])
            .unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(ctx.in_flight(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_failure_carries_streams() {
        let ctx = ExecContext::new(1);
        let err = ctx
            .run(
                Path::new("."),
                "sh",
                &["-c", "printf out; printf err >&2; exit 3"],
            )
            .unwrap_err();

        match err {
            Error::Command {
                exe,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(exe, "sh");
                assert_eq!(stdout, "out");
                assert_eq!(stderr, "err");
            }
            other => panic!("Expected Command error, got {other:?}"),
        }
        assert_eq!(ctx.in_flight(), 0);
    }

    #[test]
    fn test_run_spawn_error() {
        let ctx = ExecContext::new(1);
        let err = ctx
            .run(Path::new("."), "modforge-no-such-binary", &[])
            .unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_stdin() {
        let ctx = ExecContext::new(1);
        let out = ctx
            .run_with_stdin(Path::new("."), "cat", &[], Some(b"piped"))
            .unwrap();
        assert_eq!(out, b"piped");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_stdin_waits_for_child_that_stops_reading() {
        let temp = tempfile::TempDir::new().unwrap();
        let ctx = ExecContext::new(1);
        let input = vec![b'x'; 1 << 20];

        let err = ctx
            .run_with_stdin(
                temp.path(),
                "sh",
                &["-c", "exec 0<&-; sleep 1; touch finished"],
                Some(&input),
            )
            .unwrap_err();

        assert!(matches!(err, Error::Command { .. }));
        // The slot is only given back once the child is gone.
        assert!(temp.path().join("finished").exists());
        assert_eq!(ctx.in_flight(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_shutdown_waits_for_running_command() {
        let ctx = Arc::new(ExecContext::new(2));

        let worker = {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || ctx.run(Path::new("."), "sh", &["-c", "sleep 0.3"]))
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while ctx.in_flight() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctx.in_flight(), 1);

        let guard = ctx.shutdown();
        assert_eq!(ctx.in_flight(), 0);
        drop(guard);

        assert!(worker.join().unwrap().is_ok());
    }
}
