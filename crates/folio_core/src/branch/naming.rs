//! Branch name sanitizing and collision avoidance.

use super::metadata::BranchesMetadata;

/// Fallback used when a proposed name sanitizes to nothing.
const FALLBACK_NAME: &str = "branch";

/// Turn free text into a branch name token.
///
/// Lowercases, turns whitespace runs into single dashes, drops anything
/// other than ASCII alphanumerics, `-` and `_`, and trims dashes from the
/// ends.
///
/// ```ignore
/// assert_eq!(sanitize_branch_name("My Cool Branch!"), "my-cool-branch");
/// ```
pub fn sanitize_branch_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        if c.is_whitespace() || c == '-' {
            if !out.ends_with('-') {
                out.push('-');
            }
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        }
    }
    out.trim_matches('-').to_string()
}

/// Sanitize `proposed` and append `-1`, `-2`, ... until it is not taken.
pub fn generate_unique_branch_name(metadata: &BranchesMetadata, proposed: &str) -> String {
    let base = match sanitize_branch_name(proposed) {
        name if name.is_empty() => FALLBACK_NAME.to_string(),
        name => name,
    };

    if !metadata.contains(&base) {
        return base;
    }

    let mut suffix = 1;
    loop {
        let candidate = format!("{}-{}", base, suffix);
        if !metadata.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
