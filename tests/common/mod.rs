//! Shared test utilities for integration and E2E tests.
//!
//! This module provides common fixtures and helper functions to reduce
//! duplication across test files.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! #[cfg_attr(not(feature = "integration-tests"), ignore)]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_config(configs::VALID);
//!     fixture.command().arg("validate").assert().success();
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::configs;
    #[allow(unused_imports)]
    pub use super::{git, git_available, SourceRepo, TestFixture};
}

/// Common configuration YAML snippets for testing.
#[allow(dead_code)]
pub mod configs {
    /// Minimal valid configuration.
    pub const VALID: &str = r#"
build:
  every: 6h
github:
  framework: Icinga/icingaweb2
  mods:
    - org: Icinga
      repos: ['\Aicingaweb2-module-(.+)\z', '\Ano-mod-()']
deploy:
  remote: git@example.com:ops/deploy.git
  script: build.sh
  commit: Update build script
"#;

    /// Parses, but fails validation in several places at once.
    pub const INVALID: &str = r#"
log:
  level: dbug
build:
  every: sometimes
github:
  mods:
    - org: Icinga
      repos: ['\Aicingaweb2-module-.+\z']
deploy:
  remote: git@example.com:ops/deploy.git
"#;

    /// Invalid YAML for error testing.
    pub const INVALID_YAML: &str = "github: [unclosed";

    /// Valid, but with a listing API nothing listens on.
    pub const UNREACHABLE_API: &str = r#"
build:
  every: 6h
github:
  framework: Icinga/icingaweb2
  api: http://127.0.0.1:9/
  mods:
    - org: Icinga
      repos: ['\Aicingaweb2-module-(.+)\z']
deploy:
  remote: git@example.com:ops/deploy.git
  script: build.sh
  commit: Update build script
"#;
}

/// A test fixture that provides a temporary working directory with an
/// optional `config.yml`.
#[allow(dead_code)]
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

#[allow(dead_code)]
impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Add a `config.yml` with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.temp_dir
            .child("config.yml")
            .write_str(content)
            .expect("Failed to write config file");
        self
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get the path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.temp_dir.path().join("config.yml")
    }

    /// Create a child path in the temp directory.
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// Create a command running in this fixture's directory, with no
    /// configuration inherited from the environment.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("modforge");
        cmd.current_dir(self.path())
            .env_remove("MODFORGE_CONFIG")
            .env_remove("RUST_LOG");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a `git` binary is available.
#[allow(dead_code)]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Runs `git` in `dir` with a fixed identity, panicking on failure.
#[allow(dead_code)]
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=modforge tests",
            "-c",
            "user.email=tests@modforge.invalid",
            "-c",
            "init.defaultBranch=main",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "tag.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");

    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A local repository standing in for `<web><owner>/<name>.git`.
#[allow(dead_code)]
pub struct SourceRepo {
    pub path: PathBuf,
}

#[allow(dead_code)]
impl SourceRepo {
    /// Creates an empty repository at `<root>/<owner>/<name>.git`.
    pub fn new(root: &Path, owner: &str, name: &str) -> Self {
        let path = root.join(owner).join(format!("{name}.git"));
        std::fs::create_dir_all(&path).expect("Failed to create repository dir");
        git(&path, &["init", "--quiet"]);
        Self { path }
    }

    /// Writes `file` and commits it; returns the commit hash.
    pub fn commit(&self, file: &str, content: &str) -> String {
        std::fs::write(self.path.join(file), content).expect("Failed to write file");
        git(&self.path, &["add", "--", file]);
        git(&self.path, &["commit", "--quiet", "-m", &format!("Update {file}")]);
        git(&self.path, &["rev-parse", "HEAD"])
    }

    /// Tags the current commit.
    pub fn tag(&self, tag: &str) -> &Self {
        git(&self.path, &["tag", tag]);
        self
    }
}
