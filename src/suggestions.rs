//! # Error Suggestions
//!
//! Helpers for error messages that tell the operator what went wrong AND how
//! to fix it. Configuration validation collects these as problem lines; the
//! CLI turns the fatal ones into `anyhow` errors.

use std::path::Path;

/// Log levels accepted in `log.level` and `--log-level`.
pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Generate an error for when the configuration file is not found.
///
/// Includes hints about:
/// - Using the --config flag
/// - Using the MODFORGE_CONFIG environment variable
pub fn config_not_found(path: &Path) -> anyhow::Error {
    anyhow::anyhow!(
        "Configuration file not found: {path}\n\n\
         hint: Create a config.yml in the working directory\n\
         hint: Use --config to specify a different path\n\
         hint: Set MODFORGE_CONFIG environment variable",
        path = path.display()
    )
}

/// Problem line for an invalid repository pattern.
///
/// Includes hints about common regex mistakes.
pub fn invalid_regex(pattern: &str, error: &regex::Error) -> String {
    let hint = match error {
        regex::Error::Syntax(msg) if msg.contains("unclosed") => {
            "hint: Check for unclosed brackets, parentheses, or braces"
        }
        regex::Error::Syntax(msg) if msg.contains("repetition") => {
            "hint: Repetition operators (+, *, ?) must follow a pattern"
        }
        _ => "hint: Test patterns at https://regex101.com (select Rust flavor)",
    };

    format!("Bad repository pattern: {pattern}\n    error: {error}\n    {hint}")
}

/// Problem line for an unknown log level, suggesting the closest valid one.
pub fn unknown_log_level(level: &str) -> String {
    let did_you_mean = find_similar(&level.to_lowercase(), &LOG_LEVELS)
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default();

    format!(
        "Bad log level: {level}{did_you_mean}; valid levels are: {}",
        LOG_LEVELS.join(", ")
    )
}

/// Find a similar string from a list of candidates using edit distance.
///
/// Returns Some(candidate) if a close match is found (edit distance <= 2).
fn find_similar<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|&candidate| {
            let distance = edit_distance(input, candidate);
            if distance <= 2 && distance < input.len() {
                Some((candidate, distance))
            } else {
                None
            }
        })
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

/// Calculate the Levenshtein edit distance between two strings.
fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    // Single-row variant: `previous[j]` is the distance of a[..i] to b[..j].
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}
