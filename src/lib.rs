//! # modforge
//!
//! This library periodically assembles a deploy script that, when executed
//! elsewhere, materializes a web application from a framework repository plus
//! a curated, auto-discovered set of module repositories, each pinned to its
//! most recent release commit. It is used by the `modforge` command-line tool.
//!
//! ## Quick Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use modforge::script::{assemble, BuildPlan, ScriptOptions};
//! use modforge::version::{select_tag, ResolvedVersion};
//!
//! let tags = vec!["v1.2.0".to_string(), "v1.3.0-rc1".to_string()];
//! let selection = select_tag(&tags);
//! assert_eq!(selection.tag, "v1.2.0");
//!
//! let plan = BuildPlan {
//!     framework: ResolvedVersion {
//!         remote: "https://github.com/Icinga/icingaweb2.git".to_string(),
//!         tag: selection.tag,
//!         commit: "0123abcd".to_string(),
//!         module_id: None,
//!     },
//!     modules: BTreeMap::new(),
//! };
//! let script = assemble(&plan, &ScriptOptions::default());
//! assert!(script.starts_with(b"#!/bin/sh\n"));
//! ```
//!
//! ## Core Concepts
//!
//! - **Discovery (`discovery`)**: lists the public repositories of the
//!   configured accounts and classifies them into modules with patterns.
//! - **Mirrors (`mirror`, `git`, `exec`)**: a local store of bare mirrors kept
//!   in exact correspondence with the expected repositories, updated through
//!   the system `git` under a shared process budget.
//! - **Versions (`version`, `identity`)**: the release commit to pin per
//!   mirror, and a module's self-declared identifier from `module.info`.
//! - **Script (`script`)**: the deterministic, idempotent deploy script.
//!
//! ## Execution Flow
//!
//! [`build::build`] runs one cycle: discovery, classification, mirror
//! reconciliation, concurrent version resolution, assembly. It either
//! returns a complete script or fails as a whole. Around it,
//! [`schedule::run`] reloads the configuration, waits for the next build,
//! deploys the script through git ([`deploy`]) and reports repositories no
//! pattern covers ([`notify`]).

pub mod build;
pub mod config;
pub mod deploy;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod git;
pub mod identity;
pub mod mirror;
pub mod notify;
pub mod schedule;
pub mod script;
pub mod suggestions;
pub mod version;
