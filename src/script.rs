//! Assembly of the deploy script.
//!
//! The script clones the framework and every module from their remotes and
//! extracts the pinned commits into `<target>/` and `<target>/modules/<id>/`.
//! Modules already present under `<target>/modules/` are left alone, so a
//! module bundled with the framework wins over a discovered one.

use std::collections::BTreeMap;

use crate::version::ResolvedVersion;

/// Default directory the framework is extracted into.
pub const DEFAULT_TARGET: &str = "icingaweb2";

/// Default scratch directory for the bare clones.
pub const DEFAULT_TEMP: &str = "dockerweb2-temp";

/// The framework and modules to install, each pinned to a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub framework: ResolvedVersion,
    pub modules: BTreeMap<String, ResolvedVersion>,
}

/// Directory names used by the generated script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOptions {
    pub target: String,
    pub temp: String,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            temp: DEFAULT_TEMP.to_string(),
        }
    }
}

/// Renders `plan` as a POSIX shell script.
///
/// The output depends on nothing but the arguments.
pub fn assemble(plan: &BuildPlan, options: &ScriptOptions) -> Vec<u8> {
    let ScriptOptions { target, temp } = options;
    let framework = &plan.framework;

    let mut script = format!(
        "#!/bin/sh
set -exo pipefail

rm -rf {temp}
git clone --bare '{remote}' {temp}
# {tag}
git -C {temp} archive --prefix={target}/ {commit} |tar -x
",
        remote = quote(&framework.remote),
        tag = comment(&framework.tag),
        commit = framework.commit,
    );

    for (module, version) in &plan.modules {
        let module = quote(module);
        script.push_str(&format!(
            "
if [ ! -e '{target}/modules/{module}' ]; then
\trm -rf {temp}
\tgit clone --bare '{remote}' {temp}
\t# {tag}
\tgit -C {temp} archive '--prefix={target}/modules/{module}/' {commit} |tar -x
fi
",
            remote = quote(&version.remote),
            tag = comment(&version.tag),
            commit = version.commit,
        ));
    }

    script.push_str(&format!("\nrm -rf {temp}\n"));
    script.into_bytes()
}

/// Escapes `value` for use inside single quotes.
fn quote(value: &str) -> String {
    value.replace('\'', r"'\''")
}

/// Keeps `value` on a single comment line.
fn comment(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
