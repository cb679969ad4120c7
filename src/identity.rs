//! Self-declared module identifiers.
//!
//! A repository may name the module it provides in a `module.info` file at its
//! root, on a line like `Module: director`. The file is read straight out of a
//! mirror with `git archive`, without a checkout.

use std::io::{self, ErrorKind, Read};
use std::path::Path;
use std::sync::LazyLock;

use log::{error, trace, warn};
use regex::Regex;

use crate::error::{Error, Result};
use crate::git::GitOperations;
use crate::version::{TagSelection, HEAD};

/// Metadata file a repository declares its module identifier in.
pub const METADATA_FILE: &str = "module.info";

static MODULE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Module:\s*(\S+)").expect("module field pattern is valid"));

/// Looks up the module identifier declared in `module.info` as of `tag`.
///
/// A missing file or a file without a `Module:` line yields `Ok(None)`.
/// A corrupt archive stream is an error.
pub fn identify(
    git: &dyn GitOperations,
    mirror: &Path,
    remote: &str,
    tag: &str,
) -> Result<Option<String>> {
    let present = match git.has_file(mirror, tag, METADATA_FILE) {
        Ok(present) => present,
        // An empty repository has no HEAD to list.
        Err(_) if tag == HEAD => return Ok(None),
        Err(e) => return Err(e),
    };

    if !present {
        trace!("No module.info file found: remote={} tag={}", remote, tag);
        return Ok(None);
    }

    let archive = git.archive(mirror, tag, METADATA_FILE)?;
    let content = read_archived_file(&archive, METADATA_FILE).map_err(|e| {
        error!(
            "Got bad output from git archive: remote={} tag={} error={}",
            remote, tag, e
        );
        Error::Archive {
            remote: remote.to_string(),
            tag: tag.to_string(),
            message: e.to_string(),
        }
    })?;

    match parse_module_field(&content) {
        Some(module) if !is_directory_name(&module) => {
            warn!(
                "module.info file names a module outside the modules dir: remote={} tag={} module={:?}",
                remote, tag, module
            );
            Ok(None)
        }
        Some(module) => {
            trace!(
                "module.info file names a module: remote={} tag={} module={}",
                remote,
                tag,
                module
            );
            Ok(Some(module))
        }
        None => {
            trace!(
                "module.info file doesn't name any module: remote={} tag={}",
                remote,
                tag
            );
            Ok(None)
        }
    }
}

/// Like [`identify`], falling back from the selected tag to the greatest
/// pre-release tag (if different) and then to `HEAD`.
pub fn identify_with_fallback(
    git: &dyn GitOperations,
    mirror: &Path,
    remote: &str,
    selection: &TagSelection,
) -> Result<Option<String>> {
    let mut module = identify(git, mirror, remote, &selection.tag)?;

    if module.is_none() && selection.tag != HEAD {
        if let Some(pre) = selection
            .pre_release
            .as_deref()
            .filter(|pre| *pre != selection.tag)
        {
            module = identify(git, mirror, remote, pre)?;
        }

        if module.is_none() {
            module = identify(git, mirror, remote, HEAD)?;
        }
    }

    Ok(module)
}

/// Extracts the `Module:` value from a metadata file.
pub fn parse_module_field(content: &[u8]) -> Option<String> {
    let content = String::from_utf8_lossy(content);
    MODULE_FIELD
        .captures(&content)
        .map(|captures| captures[1].to_string())
}

/// Whether `module` can be used as a single directory below `modules/`.
fn is_directory_name(module: &str) -> bool {
    !matches!(module, "." | "..") && !module.contains(['/', '\\', '\0'])
}

/// Copies the entry `name` out of a tar stream.
///
/// A stream that ends before the entry shows up is as malformed as a
/// truncated header: `git archive <rev> <name>` always contains it.
fn read_archived_file(archive: &[u8], name: &str) -> io::Result<Vec<u8>> {
    let mut reader = tar::Archive::new(archive);

    for entry in reader.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_ref() == Path::new(name) {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }

    Err(io::Error::new(
        ErrorKind::UnexpectedEof,
        format!("archive ended without {name}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn tar_with(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// Repository double: `module.info` content per revision, plus the
    /// revisions whose listing fails.
    #[derive(Default)]
    struct MetadataRepo {
        files: HashMap<String, Vec<u8>>,
        archives: HashMap<String, Vec<u8>>,
        broken_revs: Vec<String>,
        looked_up: Mutex<Vec<String>>,
    }

    impl MetadataRepo {
        fn with_file(mut self, rev: &str, content: &str) -> Self {
            self.files.insert(rev.to_string(), content.as_bytes().to_vec());
            self
        }
    }

    impl GitOperations for MetadataRepo {
        fn init_bare(&self, _dir: &Path) -> Result<()> {
            Ok(())
        }

        fn add_mirror_remote(&self, _dir: &Path, _remote: &str) -> Result<()> {
            Ok(())
        }

        fn set_remote(&self, _dir: &Path, _remote: &str) -> Result<()> {
            Ok(())
        }

        fn fetch(&self, _dir: &Path) -> Result<()> {
            Ok(())
        }

        fn tags(&self, _dir: &Path) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn commit_of(&self, _dir: &Path, rev: &str) -> Result<String> {
            Ok(rev.to_string())
        }

        fn has_file(&self, dir: &Path, rev: &str, _file: &str) -> Result<bool> {
            self.looked_up.lock().unwrap().push(rev.to_string());
            if self.broken_revs.iter().any(|r| r == rev) {
                return Err(Error::Command {
                    exe: "git".to_string(),
                    args: vec!["ls-tree".to_string(), rev.to_string()],
                    dir: dir.display().to_string(),
                    message: "exit status: 128".to_string(),
                    stdout: String::new(),
                    stderr: "fatal: Not a valid object name".to_string(),
                });
            }
            Ok(self.files.contains_key(rev) || self.archives.contains_key(rev))
        }

        fn archive(&self, _dir: &Path, rev: &str, file: &str) -> Result<Vec<u8>> {
            if let Some(raw) = self.archives.get(rev) {
                return Ok(raw.clone());
            }
            let content = self.files.get(rev).cloned().unwrap_or_default();
            Ok(tar_with(&[(file, &content)]))
        }
    }

    fn selection(tag: &str, pre: Option<&str>) -> TagSelection {
        TagSelection {
            tag: tag.to_string(),
            pre_release: pre.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_module_field() {
        assert_eq!(
            parse_module_field(b"Module: director\nVersion: 1.8.0\n"),
            Some("director".to_string())
        );
        assert_eq!(
            parse_module_field(b"Name: x\nModule:\tbusinessprocess  \n"),
            Some("businessprocess".to_string())
        );
        assert_eq!(parse_module_field(b"Name: x\nVersion: 1\n"), None);
        assert_eq!(parse_module_field(b"  Module: indented\n"), None);
        assert_eq!(parse_module_field(b""), None);
    }

    #[test]
    fn test_identify_reads_module_info() {
        let repo = MetadataRepo::default().with_file("v1.0.0", "Module: director\n");
        let module = identify(&repo, Path::new("m"), "r", "v1.0.0").unwrap();
        assert_eq!(module.as_deref(), Some("director"));
    }

    #[test]
    fn test_identify_without_file_is_not_an_error() {
        let repo = MetadataRepo::default();
        assert_eq!(identify(&repo, Path::new("m"), "r", "v1.0.0").unwrap(), None);
    }

    #[test]
    fn test_identify_rejects_paths_as_module() {
        testing_logger::setup();

        for declared in ["..", ".", "../../etc", "a/b", "nul\0byte"] {
            let repo = MetadataRepo::default()
                .with_file("v1.0.0", &format!("Module: {declared}\n"));
            assert_eq!(
                identify(&repo, Path::new("m"), "r", "v1.0.0").unwrap(),
                None,
                "{declared:?}"
            );
        }

        testing_logger::validate(|logs| {
            let warnings: Vec<_> = logs
                .iter()
                .filter(|log| log.level == log::Level::Warn)
                .collect();
            assert_eq!(warnings.len(), 5);
            assert!(warnings[0].body.contains("outside the modules dir"));
        });
    }

    #[test]
    fn test_directory_name() {
        assert!(is_directory_name("director"));
        assert!(is_directory_name("x.y"));
        assert!(is_directory_name("..."));
        assert!(!is_directory_name(".."));
        assert!(!is_directory_name("a/b"));
        assert!(!is_directory_name("a\\b"));
    }

    #[test]
    fn test_identify_without_module_line() {
        let repo = MetadataRepo::default().with_file("v1.0.0", "Version: 1.0.0\n");
        assert_eq!(identify(&repo, Path::new("m"), "r", "v1.0.0").unwrap(), None);
    }

    #[test]
    fn test_identify_listing_failure() {
        let repo = MetadataRepo {
            broken_revs: vec!["v1.0.0".to_string(), HEAD.to_string()],
            ..Default::default()
        };
        assert!(identify(&repo, Path::new("m"), "r", "v1.0.0").is_err());
        // An empty repository simply has nothing to declare.
        assert_eq!(identify(&repo, Path::new("m"), "r", HEAD).unwrap(), None);
    }

    #[test]
    fn test_identify_corrupt_archive_is_fatal() {
        let mut archive = tar_with(&[(METADATA_FILE, b"Module: director\n")]);
        archive.truncate(100);
        let repo = MetadataRepo {
            archives: HashMap::from([("v1.0.0".to_string(), archive)]),
            ..Default::default()
        };

        let err = identify(&repo, Path::new("m"), "r", "v1.0.0").unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }

    #[test]
    fn test_identify_archive_without_entry_is_fatal() {
        let repo = MetadataRepo {
            archives: HashMap::from([("v1.0.0".to_string(), tar_with(&[("README", b"hi")]))]),
            ..Default::default()
        };

        let err = identify(&repo, Path::new("m"), "r", "v1.0.0").unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }

    #[test]
    fn test_fallback_to_pre_release_then_head() {
        let repo = MetadataRepo::default().with_file(HEAD, "Module: director\n");
        let module =
            identify_with_fallback(&repo, Path::new("m"), "r", &selection("v1.0.0", Some("v2.0.0-rc1")))
                .unwrap();

        assert_eq!(module.as_deref(), Some("director"));
        assert_eq!(
            *repo.looked_up.lock().unwrap(),
            vec!["v1.0.0", "v2.0.0-rc1", HEAD]
        );
    }

    #[test]
    fn test_fallback_stops_at_first_identity() {
        let repo = MetadataRepo::default()
            .with_file("v2.0.0-rc1", "Module: fresh\n")
            .with_file(HEAD, "Module: head\n");
        let module =
            identify_with_fallback(&repo, Path::new("m"), "r", &selection("v1.0.0", Some("v2.0.0-rc1")))
                .unwrap();

        assert_eq!(module.as_deref(), Some("fresh"));
        assert_eq!(*repo.looked_up.lock().unwrap(), vec!["v1.0.0", "v2.0.0-rc1"]);
    }

    #[test]
    fn test_fallback_skips_pre_release_when_selected() {
        let repo = MetadataRepo::default();
        let module = identify_with_fallback(
            &repo,
            Path::new("m"),
            "r",
            &selection("v2.0.0-rc1", Some("v2.0.0-rc1")),
        )
        .unwrap();

        assert_eq!(module, None);
        assert_eq!(*repo.looked_up.lock().unwrap(), vec!["v2.0.0-rc1", HEAD]);
    }

    #[test]
    fn test_no_fallback_from_head() {
        let repo = MetadataRepo::default();
        let module = identify_with_fallback(&repo, Path::new("m"), "r", &selection(HEAD, None)).unwrap();

        assert_eq!(module, None);
        assert_eq!(*repo.looked_up.lock().unwrap(), vec![HEAD]);
    }
}
