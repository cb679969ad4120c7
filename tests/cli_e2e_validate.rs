//! End-to-end tests for the `validate` command.
//!
//! These tests invoke the actual CLI binary and validate the behavior of the
//! `validate` subcommand from a user's perspective.

mod common;
use common::prelude::*;

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_valid_config() {
    let fixture = TestFixture::new().with_config(configs::VALID);

    fixture
        .command()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Framework: Icinga/icingaweb2"))
        .stdout(predicate::str::contains("Repository patterns: 2"))
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_reports_every_problem() {
    let fixture = TestFixture::new().with_config(configs::INVALID);

    fixture
        .command()
        .arg("validate")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("did you mean 'debug'?"))
        .stdout(predicate::str::contains("Bad build schedule: sometimes"))
        .stdout(predicate::str::contains("github.framework"))
        .stdout(predicate::str::contains("not exactly one subpattern"))
        .stdout(predicate::str::contains("deploy.script"))
        .stdout(predicate::str::contains("deploy.commit"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_invalid_yaml() {
    let fixture = TestFixture::new().with_config(configs::INVALID_YAML);

    fixture
        .command()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("YAML parsing error"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_missing_config() {
    let fixture = TestFixture::new();

    fixture
        .command()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"))
        .stderr(predicate::str::contains("MODFORGE_CONFIG"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_validate_config_from_env() {
    let fixture = TestFixture::new();
    fixture
        .child("elsewhere.yml")
        .write_str(configs::VALID)
        .unwrap();

    fixture
        .command()
        .env("MODFORGE_CONFIG", fixture.path().join("elsewhere.yml"))
        .arg("validate")
        .assert()
        .success();
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_bad_log_level_flag() {
    let fixture = TestFixture::new().with_config(configs::VALID);

    fixture
        .command()
        .args(["--log-level", "tarce", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("did you mean 'trace'?"));
}
