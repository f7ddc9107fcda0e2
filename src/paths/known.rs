//! Commands the path cache knows about up front.

use super::Discovery;

pub const WHICH: &str = "which";
/// Name under which the path-helper prefix is stored.
pub const EVAL: &str = "eval";

/// Loads the login `PATH` before running the rest of the line.
#[cfg(target_os = "macos")]
pub const PATH_HELPER_PREFIX: &str = "eval `/usr/libexec/path_helper -s`;";
#[cfg(not(target_os = "macos"))]
pub const PATH_HELPER_PREFIX: &str = ". /etc/profile >/dev/null 2>&1;";

/// Resolved through the locator.
const LOCATED: &[&str] = &[
    "git", "xcodebuild", "otool", "security", "lipo", "codesign", "xcrun", "rm", "unzip", "chmod",
    "mdfind", "dwarfdump", "atos", "diff", "plutil", "openssl", "find", "sh", "hdiutil", "cp",
];

// The plain locator picks the wrong one of several installed interpreters for these.
const PATH_HELPED: &[&str] = &["pod", "ruby"];

/// Discovery strategy of every command warmed up at start.
pub fn known_commands() -> Vec<(&'static str, Discovery)> {
    LOCATED
        .iter()
        .map(|name| (*name, Discovery::Locator))
        .chain(PATH_HELPED.iter().map(|name| (*name, Discovery::PathHelper)))
        .collect()
}

/// Paths that cannot be discovered and are fixed instead.
pub fn seeded_paths() -> Vec<(&'static str, String)> {
    vec![
        (WHICH, "/usr/bin/which".to_string()),
        (EVAL, PATH_HELPER_PREFIX.to_string()),
        ("PlistBuddy", "/usr/libexec/PlistBuddy".to_string()),
        // `/bin/echo` does not decode escapes the way the shell builtin does.
        ("echo", "echo".to_string()),
        ("grep", "/usr/bin/grep".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_table_has_no_duplicates() {
        let mut names: Vec<_> = known_commands().into_iter().map(|(n, _)| n).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_interpreters_use_path_helper() {
        for (name, discovery) in known_commands() {
            let helped = matches!(discovery, Discovery::PathHelper);
            assert_eq!(helped, name == "pod" || name == "ruby", "{}", name);
        }
    }

    #[test]
    fn test_seeded_names_are_not_discovered() {
        let known: Vec<_> = known_commands().into_iter().map(|(n, _)| n).collect();
        for (name, _) in seeded_paths() {
            assert!(!known.contains(&name), "{}", name);
        }
    }
}
