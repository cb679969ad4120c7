//! # Release Version Resolution
//!
//! This module decides which commit of a mirror gets pinned into the build
//! script.
//!
//! ## Process
//!
//! 1.  **Tag Listing**: all tags of the mirror are listed with `git tag`.
//!
//! 2.  **Version Filtering**: only tags of the form `v1`, `1.2`, `v1.2.3.4`,
//!     `v2.0.0-rc.1` and so on are considered: an optional leading `v`, one or
//!     more dot-separated numbers and an optional semver pre-release suffix.
//!     A tag that has this shape but still cannot be parsed (a component that
//!     overflows, a pre-release identifier with a leading zero) is logged and
//!     skipped.
//!
//! 3.  **Selection**: the greatest final release wins. Without any final
//!     release the greatest pre-release is used, and without either the
//!     mirror is pinned at `HEAD`. Release numbers are compared field by
//!     field, missing fields counting as zero; pre-releases follow the semver
//!     precedence rules.
//!
//! 4.  **Commit Lookup**: the selected reference is resolved to a full commit
//!     hash. If that fails for `HEAD`, `HEAD` itself is used in place of the
//!     hash; for a concrete tag it is an error.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::LazyLock;

use log::{trace, warn};
use regex::Regex;
use semver::Prerelease;

use crate::error::Result;
use crate::git::GitOperations;

/// Reference used when a repository has no releasable tag.
pub const HEAD: &str = "HEAD";

static VERSION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\Av?(\d+(?:\.\d+)*)(?:-([0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?\z")
        .expect("version tag pattern is valid")
});

/// A parsed version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVersion {
    release: Vec<u64>,
    pre: Prerelease,
}

impl TagVersion {
    /// Parses `tag` as a version tag.
    ///
    /// Returns `None` if the tag does not look like a version at all, and
    /// `Some(Err(reason))` if it does but cannot be parsed.
    pub fn parse_tag(tag: &str) -> Option<std::result::Result<Self, String>> {
        let captures = VERSION_TAG.captures(tag)?;
        let release = captures[1]
            .split('.')
            .map(|field| field.parse::<u64>().map_err(|e| format!("{field}: {e}")))
            .collect::<std::result::Result<Vec<_>, _>>();
        let pre = match captures.get(2) {
            Some(pre) => Prerelease::new(pre.as_str()).map_err(|e| e.to_string()),
            None => Ok(Prerelease::EMPTY),
        };

        Some(release.and_then(|release| pre.map(|pre| Self { release, pre })))
    }

    /// Whether this version carries a pre-release suffix.
    pub fn is_pre_release(&self) -> bool {
        !self.pre.is_empty()
    }
}

impl Ord for TagVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let fields = self.release.len().max(other.release.len());
        for i in 0..fields {
            let ours = self.release.get(i).copied().unwrap_or(0);
            let theirs = other.release.get(i).copied().unwrap_or(0);
            match ours.cmp(&theirs) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }

        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.pre.cmp(&other.pre),
        }
    }
}

impl PartialOrd for TagVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of picking tags from a tag listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSelection {
    /// Reference to pin: the greatest final release, else the greatest
    /// pre-release, else `HEAD`.
    pub tag: String,
    /// Greatest pre-release tag, whether or not it was selected.
    pub pre_release: Option<String>,
}

/// Picks the tag to pin from `tags`.
///
/// Among tags denoting equal versions (`1.0` and `v1.0.0`) the first one in
/// `tags` wins.
pub fn select_tag(tags: &[String]) -> TagSelection {
    let mut latest_final: Option<(&str, TagVersion)> = None;
    let mut latest_pre: Option<(&str, TagVersion)> = None;

    for tag in tags {
        let version = match TagVersion::parse_tag(tag) {
            None => continue,
            Some(Ok(version)) => version,
            Some(Err(reason)) => {
                warn!(
                    "Something is wrong with a version: bad_version={} error={}",
                    tag, reason
                );
                continue;
            }
        };

        let slot = if version.is_pre_release() {
            &mut latest_pre
        } else {
            &mut latest_final
        };

        if slot.as_ref().is_none_or(|(_, best)| version > *best) {
            *slot = Some((tag, version));
        }
    }

    let pre_release = latest_pre.map(|(tag, _)| tag.to_string());
    let tag = match (latest_final, &pre_release) {
        (Some((tag, _)), _) => tag.to_string(),
        (None, Some(pre)) => pre.clone(),
        (None, None) => HEAD.to_string(),
    };

    TagSelection { tag, pre_release }
}

/// A mirror pinned to one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// URL the mirror fetches from.
    pub remote: String,
    /// Selected tag, or `HEAD`.
    pub tag: String,
    /// Full commit hash; `HEAD` only if even `HEAD` could not be resolved.
    pub commit: String,
    /// Self-declared module identifier, when one was looked up and found.
    pub module_id: Option<String>,
}

/// A resolved version plus what was learned about the tags on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub version: ResolvedVersion,
    pub selection: TagSelection,
}

/// Resolves the commit to pin for the mirror at `mirror`.
pub fn resolve(git: &dyn GitOperations, mirror: &Path, remote: &str) -> Result<Resolution> {
    let tags = git.tags(mirror)?;
    let selection = select_tag(&tags);

    trace!("Got latest tag: remote={} tag={}", remote, selection.tag);

    let commit = match git.commit_of(mirror, &selection.tag) {
        Ok(commit) => commit,
        Err(_) if selection.tag == HEAD => HEAD.to_string(),
        Err(e) => return Err(e),
    };

    trace!("Got latest tag's commit: remote={} commit={}", remote, commit);

    Ok(Resolution {
        version: ResolvedVersion {
            remote: remote.to_string(),
            tag: selection.tag.clone(),
            commit,
            module_id: None,
        },
        selection,
    })
}
