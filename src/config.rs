//! # Configuration Schema and Validation
//!
//! This module defines the data structures that represent the `config.yml`
//! file and turns them into a [`ValidConfig`] a build cycle can run with.
//!
//! ## Loading
//!
//! [`parse`] and [`from_file`] only deserialize: every field is optional at
//! that stage, so a half-written file still loads and can be reported on as a
//! whole. [`Config::validate`] then checks everything at once and either
//! returns a [`ValidConfig`] (compiled patterns, parsed schedule, defaults
//! filled in) or an [`Error::ConfigInvalid`] listing every problem found.
//!
//! ## Example
//!
//! ```yaml
//! log:
//!   level: info
//! build:
//!   every: 6h
//! github:
//!   framework: Icinga/icingaweb2
//!   mods:
//!     - org: Icinga
//!       repos: ['\Aicingaweb2-module-(.+)\z', '\Ano-mod-()']
//! deploy:
//!   remote: git@example.com:ops/deploy.git
//!   config: {user.name: modforge, user.email: modforge@example.com}
//!   script: build.sh
//!   commit: Update build script
//! notify:
//!   snail: ops@example.com
//! ```

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::time::Duration;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::discovery::{Account, ModulePattern, ModuleSpec, RepoCandidate};
use crate::error::{Error, Result};
use crate::script::{ScriptOptions, DEFAULT_TARGET, DEFAULT_TEMP};
use crate::suggestions;

/// Configuration file looked up in the working directory by default.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Default GitHub REST API root.
pub const DEFAULT_API: &str = "https://api.github.com";

/// Default prefix of clone URLs, completed with `owner/name.git`.
pub const DEFAULT_WEB: &str = "https://github.com/";

/// The `log` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`; `info` if unset.
    pub level: Option<String>,
}

/// The `build` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Interval between builds, e.g. `6h`.
    pub every: Option<String>,
    /// Directory the script extracts the framework into.
    pub target: Option<String>,
    /// Scratch directory the script clones into.
    pub temp: Option<String>,
}

/// One entry of `github.mods`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModConfig {
    pub user: Option<String>,
    pub org: Option<String>,
    /// Repository name patterns, each with exactly one capture group.
    pub repos: Vec<String>,
    /// Identify repositories no pattern matches through `module.info`.
    pub metadata: bool,
}

/// The `github` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Framework repository as `owner/name`.
    pub framework: Option<String>,
    pub api: Option<String>,
    pub web: Option<String>,
    pub token: Option<String>,
    pub mods: Vec<ModConfig>,
}

/// The `deploy` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub remote: Option<String>,
    /// `git -c` pairs applied to every deploy command.
    pub config: BTreeMap<String, String>,
    /// Path of the script inside the deploy repository.
    pub script: Option<String>,
    pub commit: Option<String>,
}

/// The `notify` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Mail address to notify through `s-nail`.
    pub snail: Option<String>,
}

/// The configuration file as written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub build: BuildConfig,
    pub github: GitHubConfig,
    pub deploy: DeployConfig,
    pub notify: NotifyConfig,
}

/// Validated `github` settings.
#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub framework: RepoCandidate,
    pub api: String,
    pub web: String,
    pub token: Option<String>,
    pub mods: Vec<ModuleSpec>,
}

impl GitHubSettings {
    /// Clone URL of `repo`.
    pub fn remote_of(&self, repo: &RepoCandidate) -> String {
        format!("{}{}/{}.git", self.web, repo.owner, repo.name)
    }

    /// The configured accounts, in configuration order.
    pub fn accounts(&self) -> Vec<Account> {
        self.mods.iter().map(|spec| spec.account.clone()).collect()
    }

    /// API token from the configuration, else from `GITHUB_TOKEN`.
    pub fn token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|token| !token.is_empty())
    }
}

/// Validated `deploy` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    pub remote: String,
    pub config: BTreeMap<String, String>,
    pub script: String,
    pub commit: String,
}

/// A configuration a cycle can run with.
#[derive(Debug, Clone)]
pub struct ValidConfig {
    pub log_level: LevelFilter,
    pub every: Duration,
    pub script: ScriptOptions,
    pub github: GitHubSettings,
    pub deploy: DeploySettings,
    pub snail: Option<String>,
}

/// Parses a YAML string into a [`Config`].
pub fn parse(yaml_content: &str) -> Result<Config> {
    // An empty file is an empty mapping, which `validate` reports on.
    if yaml_content.trim().is_empty() {
        return Ok(Config::default());
    }

    Ok(serde_yaml::from_str(yaml_content)?)
}

/// Parse a [`Config`] from a YAML file path
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

/// Loads and validates the configuration at `path`.
pub fn load<P: AsRef<Path>>(path: P) -> Result<ValidConfig> {
    from_file(path)?.validate()
}

impl Config {
    /// Checks the whole configuration, collecting every problem.
    pub fn validate(&self) -> Result<ValidConfig> {
        let mut problems = Vec::new();

        let log_level = match self.log.level.as_deref().map(str::trim) {
            None | Some("") => LevelFilter::Info,
            Some(level) => parse_log_level(level).unwrap_or_else(|| {
                problems.push(suggestions::unknown_log_level(level));
                LevelFilter::Info
            }),
        };

        let every = match non_blank(&self.build.every) {
            None => {
                problems.push("Build schedule missing (build.every, e.g. 6h)".to_string());
                Duration::ZERO
            }
            Some(every) => parse_duration(every).unwrap_or_else(|e| {
                problems.push(format!("Bad build schedule: {every}: {e}"));
                Duration::ZERO
            }),
        };

        let script = ScriptOptions {
            target: script_dir(&self.build.target, DEFAULT_TARGET, "build.target", &mut problems),
            temp: script_dir(&self.build.temp, DEFAULT_TEMP, "build.temp", &mut problems),
        };

        let github = self.github.validate(&mut problems);

        let deploy = DeploySettings {
            remote: required(&self.deploy.remote, "Deploy repository missing (deploy.remote)", &mut problems),
            config: self.deploy.config.clone(),
            script: required(&self.deploy.script, "Deploy path missing (deploy.script)", &mut problems),
            commit: required(
                &self.deploy.commit,
                "Deploy commit message missing (deploy.commit)",
                &mut problems,
            ),
        };
        if !deploy.script.is_empty() && !is_contained(&deploy.script) {
            problems.push(format!(
                "Deploy path must stay inside the deploy repository: {}",
                deploy.script
            ));
        }
        for key in deploy.config.keys() {
            if key.trim().is_empty() || key.contains('=') {
                problems.push(format!("Bad git config key in deploy.config: {key:?}"));
            }
        }

        match github {
            Some(github) if problems.is_empty() => Ok(ValidConfig {
                log_level,
                every,
                script,
                github,
                deploy,
                snail: non_blank(&self.notify.snail).map(str::to_string),
            }),
            _ => Err(Error::ConfigInvalid { problems }),
        }
    }
}

impl GitHubConfig {
    fn validate(&self, problems: &mut Vec<String>) -> Option<GitHubSettings> {
        let framework = match non_blank(&self.framework) {
            None => {
                problems.push("Framework repository missing (github.framework)".to_string());
                None
            }
            Some(framework) => RepoCandidate::parse(framework).or_else(|| {
                problems.push(format!(
                    "Framework repository must look like owner/name: {framework}"
                ));
                None
            }),
        };

        let mut mods: Vec<ModuleSpec> = Vec::with_capacity(self.mods.len());
        for (i, module) in self.mods.iter().enumerate() {
            let account = match (non_blank(&module.user), non_blank(&module.org)) {
                (Some(user), None) => Some(Account::user(user)),
                (None, Some(org)) => Some(Account::org(org)),
                (None, None) => {
                    problems.push(format!("Account missing (github.mods[{i}].user or .org)"));
                    None
                }
                (Some(_), Some(_)) => {
                    problems.push(format!(
                        "Both user and org given (github.mods[{i}]); use one entry per account"
                    ));
                    None
                }
            };

            if module.repos.is_empty() {
                problems.push(format!("Repository patterns missing (github.mods[{i}].repos)"));
            }

            let mut patterns = Vec::with_capacity(module.repos.len());
            for source in &module.repos {
                match ModulePattern::compile(source) {
                    Ok(pattern) => patterns.push(pattern),
                    Err(Error::Regex(e)) => problems.push(suggestions::invalid_regex(source, &e)),
                    Err(e) => problems.push(e.to_string()),
                }
            }

            if let Some(account) = account {
                if mods
                    .iter()
                    .any(|spec| spec.account.id == account.id && spec.account.kind != account.kind)
                {
                    problems.push(format!(
                        "Account given as both user and org (github.mods[{i}]): {}",
                        account.id
                    ));
                }
                mods.push(ModuleSpec {
                    account,
                    patterns,
                    metadata: module.metadata,
                });
            }
        }

        let api = non_blank(&self.api).unwrap_or(DEFAULT_API).to_string();
        if let Err(e) = url::Url::parse(&api) {
            problems.push(format!("Bad API URL (github.api): {api}: {e}"));
        }

        let mut web = non_blank(&self.web).unwrap_or(DEFAULT_WEB).to_string();
        if !web.ends_with('/') {
            web.push('/');
        }

        Some(GitHubSettings {
            framework: framework?,
            api,
            web,
            token: non_blank(&self.token).map(str::to_string),
            mods,
        })
    }
}

/// Parses a log level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Option<LevelFilter> {
    match level.trim().to_lowercase().as_str() {
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// Parse a duration string like "30d", "1w", "2h" into a Duration.
///
/// Supported units: s, m, h, d, w (and their long forms). Fractions are
/// allowed; the result must be positive.
pub fn parse_duration(duration_str: &str) -> std::result::Result<Duration, String> {
    let duration_str = duration_str.trim().to_lowercase();

    if duration_str.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    // Find the split point between number and unit
    let split_idx = duration_str
        .char_indices()
        .find(|&(_, c)| !c.is_ascii_digit() && c != '.')
        .map_or(duration_str.len(), |(i, _)| i);

    if split_idx == 0 {
        return Err("Duration must start with a number".to_string());
    }

    let number_str = &duration_str[..split_idx];
    let unit_str = duration_str[split_idx..].trim();

    let number: f64 = number_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: '{number_str}'"))?;

    let seconds = match unit_str {
        "s" | "sec" | "second" | "seconds" => number,
        "m" | "min" | "minute" | "minutes" => number * 60.0,
        "h" | "hr" | "hour" | "hours" => number * 3600.0,
        "d" | "day" | "days" => number * 86400.0,
        "w" | "week" | "weeks" => number * 604800.0,
        _ => {
            return Err(format!(
                "Invalid duration unit: '{unit_str}'. Valid units: s, m, h, d, w"
            ));
        }
    };

    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err("Duration must be positive".to_string()),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required(value: &Option<String>, problem: &str, problems: &mut Vec<String>) -> String {
    non_blank(value).map(str::to_string).unwrap_or_else(|| {
        problems.push(problem.to_string());
        String::new()
    })
}

/// A directory name for the script, which uses it unquoted.
fn script_dir(
    value: &Option<String>,
    default: &str,
    field: &str,
    problems: &mut Vec<String>,
) -> String {
    let dir = non_blank(value).unwrap_or(default);
    let safe = !dir.starts_with('-')
        && dir != "."
        && dir != ".."
        && dir
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if !safe {
        problems.push(format!(
            "Bad directory name ({field}): {dir}; use letters, digits, '.', '_' and '-' only"
        ));
    }
    dir.to_string()
}

/// Whether `path` is relative and never climbs out of its base.
fn is_contained(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
