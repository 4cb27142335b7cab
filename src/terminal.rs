use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

use crate::diff::DiffView;
use crate::entity::CodeEntity;
use crate::recovery::{NoticeLevel, RecoveryHost};
use crate::revision::{find_commit, Commit, RevisionError, RevisionReader};

/// Line-oriented host for running a recovery from a terminal.
pub struct TerminalHost<R, W> {
    input: R,
    output: W,
    /// Commit chosen up front (`--commit`); matched as a hash prefix.
    commit: Option<String>,
    assume_yes: bool,
    width: usize,
}

impl<R: BufRead, W: Write> TerminalHost<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            commit: None,
            assume_yes: false,
            width: 60,
        }
    }

    pub fn with_commit(mut self, commit: Option<String>) -> Self {
        self.commit = commit.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        self
    }

    pub fn assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// `None` on EOF or read failure, which the flow treats as cancellation.
    fn read_answer(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn say(&mut self, text: &str) {
        let _ = write!(self.output, "{text}");
        let _ = self.output.flush();
    }
}

impl<R: BufRead, W: Write> RecoveryHost for TerminalHost<R, W> {
    fn pick_commit(&mut self, entity: &CodeEntity, commits: &[Commit]) -> Option<usize> {
        if let Some(wanted) = self.commit.clone() {
            return match find_commit(commits, &wanted) {
                Ok(i) => Some(i),
                Err(e) => {
                    self.say(&format!("error: {e}\n"));
                    None
                }
            };
        }

        let mut menu = format!("Select a commit for {}:\n", entity.label());
        for (i, c) in commits.iter().enumerate() {
            let day = c.date.get(..10).unwrap_or(&c.date);
            menu.push_str(&format!(
                "  [{}] {} {} {} ({})\n",
                i + 1,
                c.short_hash,
                day,
                c.message,
                c.author
            ));
        }
        menu.push_str("number (empty to cancel): ");
        self.say(&menu);

        let answer = self.read_answer()?;
        let n: usize = answer.parse().ok()?;
        if n == 0 || n > commits.len() {
            return None;
        }
        Some(n - 1)
    }

    fn show_diff(&mut self, view: &DiffView) {
        let text = if view.is_identical() {
            format!("{}\n(no differences)\n", view.title)
        } else {
            view.side_by_side(self.width)
        };
        self.say(&text);
    }

    fn confirm(&mut self, prompt: &str) -> Option<bool> {
        if self.assume_yes {
            return Some(true);
        }
        self.say(&format!("{prompt} [y/N] "));
        let answer = self.read_answer()?;
        Some(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    fn notify(&mut self, level: NoticeLevel, message: &str) {
        let prefix = match level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        self.say(&format!("{prefix}: {message}\n"));
    }
}

/// Shows a spinner on stderr while the wrapped reader waits on git.
pub struct SpinnerReader<'a> {
    inner: &'a dyn RevisionReader,
}

impl<'a> SpinnerReader<'a> {
    pub fn new(inner: &'a dyn RevisionReader) -> Self {
        Self { inner }
    }

    fn spin<T>(&self, msg: &str, f: impl FnOnce() -> T) -> T {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.set_message(msg.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        let out = f();
        spinner.finish_and_clear();
        out
    }
}

impl RevisionReader for SpinnerReader<'_> {
    fn list_commits(&self, path: &Path, limit: usize) -> Result<Vec<Commit>, RevisionError> {
        self.spin("reading history...", || self.inner.list_commits(path, limit))
    }

    fn content_at_revision(&self, path: &Path, revision: &str) -> Result<String, RevisionError> {
        self.spin(&format!("reading {revision}..."), || {
            self.inner.content_at_revision(path, revision)
        })
    }
}
