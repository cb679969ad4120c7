//! # Repository Discovery and Classification
//!
//! Discovery answers two questions every cycle: which public repositories do
//! the configured accounts have, and which of them are modules?
//!
//! ## Listing
//!
//! Each account is listed on its own thread through a [`RepoLister`]. The
//! listing pages through the hosting API, [`PAGE_SIZE`] repositories at a
//! time, until a short page comes back; the names are then sorted. If any
//! account cannot be listed, discovery as a whole fails once all accounts
//! have finished.
//!
//! ## Classification
//!
//! Every module spec pairs an account with an ordered list of
//! [`ModulePattern`]s, each a regex with exactly one capture group. All
//! discovered repositories are processed in (account, name) order, and the
//! first pattern that matches a repository decides its fate:
//!
//! - a non-empty capture names the module the repository provides. If an
//!   earlier repository already claimed that module, the earlier one keeps it;
//! - an empty capture (as in `\Ano-mod-()`) marks the repository as
//!   deliberately ignored.
//!
//! Repositories no pattern matches are reported as unknown, so an operator can
//! extend the patterns. For specs with `metadata` enabled they are also handed
//! back as candidates whose module identifier is read from `module.info`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::mpsc;

use log::{error, info, trace, warn};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Number of repositories requested per listing page.
pub const PAGE_SIZE: usize = 100;

/// Whether an account is a user or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    User,
    Org,
}

/// A source-hosting account whose repositories are scanned for modules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Account {
    pub id: String,
    pub kind: AccountKind,
}

impl Account {
    pub fn user(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: AccountKind::User,
        }
    }

    pub fn org(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: AccountKind::Org,
        }
    }
}

/// A repository `owner/name` found on the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RepoCandidate {
    pub owner: String,
    pub name: String,
}

impl RepoCandidate {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    /// Parses an `owner/name` identifier.
    pub fn parse(identifier: &str) -> Option<Self> {
        let (owner, name) = identifier.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }
}

impl fmt::Display for RepoCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A discovered repository no module pattern accounts for.
pub type UnknownRepo = RepoCandidate;

/// A repository name pattern with exactly one capture group, which captures
/// the module identifier.
#[derive(Debug, Clone)]
pub struct ModulePattern(Regex);

impl ModulePattern {
    /// Compiles `source`, rejecting patterns without exactly one capture group.
    pub fn compile(source: &str) -> Result<Self> {
        let regex = Regex::new(source)?;
        let groups = regex.captures_len() - 1;
        if groups != 1 {
            return Err(Error::ConfigParse {
                message: format!(
                    "Repository pattern with not exactly one subpattern: {source} has {groups}"
                ),
                hint: Some(
                    r"Capture the module name with one group, e.g. \Aiw2-mod-(.+)\z, or use \Ano-mod-() to ignore repositories"
                        .to_string(),
                ),
            });
        }
        Ok(Self(regex))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The captured module identifier if `name` matches; empty for ignore
    /// patterns.
    pub fn module_of<'n>(&self, name: &'n str) -> Option<&'n str> {
        let captures = self.0.captures(name)?;
        Some(captures.get(1).map_or("", |m| m.as_str()))
    }
}

/// The patterns configured for one account.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub account: Account,
    pub patterns: Vec<ModulePattern>,
    /// Identify repositories no pattern matches through `module.info`.
    pub metadata: bool,
}

/// Lists the public repositories of accounts, one page at a time.
pub trait RepoLister: Send + Sync {
    /// Names on page `page` (1-based) of the listing, at most [`PAGE_SIZE`].
    fn list_page(&self, account: &Account, page: u32) -> Result<Vec<String>>;

    /// All names of the account, sorted.
    fn list_all(&self, account: &Account) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for page in 1.. {
            let batch = self.list_page(account, page)?;
            let short = batch.len() < PAGE_SIZE;
            names.extend(batch);
            if short {
                break;
            }
        }
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Deserialize)]
struct RepoListing {
    name: String,
}

/// [`RepoLister`] backed by the GitHub REST API.
pub struct GitHubClient {
    http: Client,
    api: Url,
    token: Option<String>,
}

impl GitHubClient {
    /// Creates a client for the API rooted at `api`, e.g. `https://api.github.com`.
    pub fn new(api: &str, token: Option<String>) -> Result<Self> {
        let mut api = Url::parse(api)?;
        if !api.path().ends_with('/') {
            let path = format!("{}/", api.path());
            api.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(concat!("modforge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, api, token })
    }

    /// URL of one listing page of `account`.
    pub fn page_url(&self, account: &Account, page: u32) -> Result<Url> {
        let (collection, kind) = match account.kind {
            AccountKind::User => ("users", "owner"),
            AccountKind::Org => ("orgs", "public"),
        };

        let mut url = self
            .api
            .join(&format!("{collection}/{}/repos", account.id))?;
        url.query_pairs_mut()
            .append_pair("type", kind)
            .append_pair("per_page", &PAGE_SIZE.to_string())
            .append_pair("page", &page.to_string());
        Ok(url)
    }
}

impl RepoLister for GitHubClient {
    fn list_page(&self, account: &Account, page: u32) -> Result<Vec<String>> {
        let url = self.page_url(account, page)?;
        trace!("Fetching repo page: user={} page={}", account.id, page);

        let mut request = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let network = |e: reqwest::Error| Error::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let body = request
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.bytes())
            .map_err(network)?;

        parse_listing(&body).map_err(|e| Error::Network {
            url: url.to_string(),
            message: format!("unexpected response: {e}"),
        })
    }
}

/// Repository names from one page of a listing response.
fn parse_listing(body: &[u8]) -> serde_json::Result<Vec<String>> {
    let repos: Vec<RepoListing> = serde_json::from_slice(body)?;
    Ok(repos.into_iter().map(|repo| repo.name).collect())
}

/// Lists all accounts concurrently.
///
/// Returns the sorted repository names by account id, or [`Error::Batch`] if
/// any account could not be listed. An id is listed once, as the kind it is
/// first given with.
pub fn discover(
    lister: &dyn RepoLister,
    accounts: &[Account],
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut unique: BTreeMap<&str, &Account> = BTreeMap::new();
    for account in accounts {
        unique.entry(account.id.as_str()).or_insert(account);
    }
    let accounts: Vec<&Account> = unique.into_values().collect();
    let (tx, rx) = mpsc::channel();

    std::thread::scope(|s| {
        for account in &accounts {
            let tx = tx.clone();
            s.spawn(move || {
                info!("Fetching repos of GitHub user: user={}", account.id);
                let result = lister.list_all(account).inspect_err(|e| {
                    error!(
                        "Couldn't fetch repos of GitHub user: user={} error={}",
                        account.id, e
                    );
                });
                let _ = tx.send((account.id.clone(), result));
            });
        }
    });
    drop(tx);

    let mut repos = BTreeMap::new();
    let mut failed = 0;
    for (id, result) in rx {
        match result {
            Ok(names) => {
                repos.insert(id, names);
            }
            Err(_) => failed += 1,
        }
    }

    if failed > 0 {
        return Err(Error::Batch {
            stage: "account listings",
            failed,
            total: accounts.len(),
        });
    }

    Ok(repos)
}

/// Outcome of matching discovered repositories against the module specs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Module identifier to the repository providing it.
    pub modules: BTreeMap<String, RepoCandidate>,
    /// Unmatched repositories of metadata-enabled accounts, in (owner, name)
    /// order.
    pub metadata_candidates: Vec<RepoCandidate>,
    /// Repositories no pattern matched.
    pub unknown: BTreeSet<UnknownRepo>,
}

/// Classifies the `discovered` repositories against `specs`.
///
/// `framework` is excluded: it is neither a module nor unknown.
pub fn classify(
    specs: &[ModuleSpec],
    discovered: &BTreeMap<String, Vec<String>>,
    framework: Option<&RepoCandidate>,
) -> Classification {
    let mut specs_by_account: BTreeMap<&str, Vec<&ModuleSpec>> = BTreeMap::new();
    for spec in specs {
        specs_by_account
            .entry(spec.account.id.as_str())
            .or_default()
            .push(spec);
    }

    let candidates: BTreeSet<RepoCandidate> = discovered
        .iter()
        .flat_map(|(owner, names)| names.iter().map(move |name| RepoCandidate::new(owner, name)))
        .filter(|candidate| Some(candidate) != framework)
        .collect();

    let mut classification = Classification::default();

    for candidate in candidates {
        let account_specs = specs_by_account
            .get(candidate.owner.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();

        let matched = account_specs
            .iter()
            .flat_map(|spec| spec.patterns.iter())
            .find_map(|pattern| pattern.module_of(&candidate.name));

        match matched {
            Some("") => {
                trace!("Ignoring repository: repo={}", candidate);
            }
            Some(module) => {
                if let Some(winner) = classification.modules.get(module) {
                    warn!(
                        "Module provided by several repositories: module={} kept={} ignored={}",
                        module, winner, candidate
                    );
                } else {
                    trace!("Found module: module={} repo={}", module, candidate);
                    classification
                        .modules
                        .insert(module.to_string(), candidate.clone());
                }
            }
            None => {
                if account_specs.iter().any(|spec| spec.metadata) {
                    classification.metadata_candidates.push(candidate.clone());
                }
                classification.unknown.insert(candidate);
            }
        }
    }

    classification
}
