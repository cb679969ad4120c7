//! # Git Operations on Bare Mirrors
//!
//! All git access of the build cycle goes through the [`GitOperations`] trait.
//! The production implementation, [`SystemGit`], shells out to the system
//! `git` binary through an [`ExecContext`], which automatically picks up:
//! - SSH keys from ~/.ssh/
//! - Git credential helpers
//! - Any configuration in ~/.gitconfig
//!
//! The trait exists so that the mirror store, the version resolver and the
//! identity resolver can be exercised in tests with mock implementations,
//! without a `git` binary or network access.

use std::path::Path;

use crate::error::Result;
use crate::exec::ExecContext;

/// Name of the remote every mirror fetches from.
pub const ORIGIN: &str = "origin";

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Initializes an empty bare repository in `dir`.
    fn init_bare(&self, dir: &Path) -> Result<()>;

    /// Adds `remote` as the mirror-fetch remote `origin` of the repository in `dir`.
    fn add_mirror_remote(&self, dir: &Path, remote: &str) -> Result<()>;

    /// Points `origin` of the repository in `dir` at `remote`.
    fn set_remote(&self, dir: &Path, remote: &str) -> Result<()>;

    /// Fetches everything from `origin`.
    fn fetch(&self, dir: &Path) -> Result<()>;

    /// Lists all tag names, in the order `git tag` prints them.
    fn tags(&self, dir: &Path) -> Result<Vec<String>>;

    /// Resolves `rev` to the full hash of the commit it points at.
    fn commit_of(&self, dir: &Path, rev: &str) -> Result<String>;

    /// Whether `rev` tracks a file named `file` at the repository root.
    fn has_file(&self, dir: &Path, rev: &str, file: &str) -> Result<bool>;

    /// Tar archive of `file` as of `rev`.
    fn archive(&self, dir: &Path, rev: &str, file: &str) -> Result<Vec<u8>>;
}

/// The default implementation of `GitOperations`, running the system `git`
/// command under the shared execution budget.
pub struct SystemGit<'a> {
    ctx: &'a ExecContext,
}

impl<'a> SystemGit<'a> {
    pub fn new(ctx: &'a ExecContext) -> Self {
        Self { ctx }
    }

    fn git(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
        self.ctx.run(dir, "git", args)
    }
}

impl GitOperations for SystemGit<'_> {
    fn init_bare(&self, dir: &Path) -> Result<()> {
        self.git(dir, &["init", "--bare"]).map(drop)
    }

    fn add_mirror_remote(&self, dir: &Path, remote: &str) -> Result<()> {
        self.git(
            dir,
            &["remote", "add", "--mirror=fetch", "--", ORIGIN, remote],
        )
        .map(drop)
    }

    fn set_remote(&self, dir: &Path, remote: &str) -> Result<()> {
        self.git(dir, &["remote", "set-url", "--", ORIGIN, remote])
            .map(drop)
    }

    fn fetch(&self, dir: &Path) -> Result<()> {
        self.git(dir, &["fetch", ORIGIN]).map(drop)
    }

    fn tags(&self, dir: &Path) -> Result<Vec<String>> {
        let stdout = self.git(dir, &["tag"])?;
        Ok(parse_lines(&stdout))
    }

    fn commit_of(&self, dir: &Path, rev: &str) -> Result<String> {
        let stdout = self.git(dir, &["log", "-1", "--format=%H", rev])?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    fn has_file(&self, dir: &Path, rev: &str, file: &str) -> Result<bool> {
        let stdout = self.git(dir, &["ls-tree", "--name-only", rev, file])?;
        Ok(!stdout.is_empty())
    }

    fn archive(&self, dir: &Path, rev: &str, file: &str) -> Result<Vec<u8>> {
        self.git(dir, &["archive", rev, file])
    }
}

/// Splits command output into its non-empty lines.
fn parse_lines(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
