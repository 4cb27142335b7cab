use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::extractor::Grammar;

pub const CONFIG_FILE_NAME: &str = ".git-rescue.json";

/// Settings read from `.git-rescue.json` at the repository root.
///
/// Every key is optional; a missing or unreadable file means defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many commits the picker offers.
    pub commit_limit: usize,

    /// Pin one grammar for every document instead of inferring it from the extension.
    pub grammar: Option<Grammar>,

    /// Unchanged lines kept around each hunk of the unified diff.
    pub diff_context_lines: usize,

    /// The `git` executable to invoke.
    pub git_binary: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            commit_limit: 20,
            grammar: None,
            diff_context_lines: 3,
            git_binary: "git".to_string(),
        }
    }
}

pub fn load_config(repo_root: &Path) -> Config {
    let primary = repo_root.join(CONFIG_FILE_NAME);

    let Ok(text) = std::fs::read_to_string(&primary) else {
        return Config::default();
    };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|e| {
        warn!(path = %primary.display(), error = %e, "ignoring malformed config");
        Config::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(tmp.path());
        assert_eq!(cfg.commit_limit, 20);
        assert_eq!(cfg.grammar, None);
        assert_eq!(cfg.git_binary, "git");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"{ "commit_limit": 5, "grammar": "tsx" }"#,
        )
        .unwrap();
        let cfg = load_config(tmp.path());
        assert_eq!(cfg.commit_limit, 5);
        assert_eq!(cfg.grammar, Some(Grammar::Tsx));
        assert_eq!(cfg.diff_context_lines, 3);
    }

    #[test]
    fn malformed_file_falls_back() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE_NAME), "{ not json").unwrap();
        assert_eq!(load_config(tmp.path()).commit_limit, 20);
    }
}
