use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;
use tracing::{debug, warn};

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const LOG_FORMAT: &str = "--format=%H%x1f%h%x1f%an%x1f%aI%x1f%s%x1e";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    /// Strict ISO-8601 author date.
    pub date: String,
    /// Subject line only.
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {args}` exited with {status}: {stderr}")]
    Git {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("{} is not inside a git work tree", path.display())]
    NotARepository { path: PathBuf },

    #[error("{} is outside the repository at {}", path.display(), root.display())]
    OutsideRepository { path: PathBuf, root: PathBuf },

    #[error("invalid revision `{0}`")]
    InvalidRevision(String),

    #[error("`{path}` does not exist at revision {revision}")]
    MissingAtRevision { path: String, revision: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitLookupError {
    #[error("commit {wanted} is not among the {searched} most recent commits of this file")]
    NotFound { wanted: String, searched: usize },

    #[error("commit prefix {wanted} is ambiguous, it matches {}", matches.join(", "))]
    Ambiguous { wanted: String, matches: Vec<String> },
}

/// Index of the commit named by a full hash, a unique hash prefix or a short hash.
pub fn find_commit(commits: &[Commit], wanted: &str) -> Result<usize, CommitLookupError> {
    let wanted = wanted.trim();
    if let Some(i) = commits.iter().position(|c| c.hash == wanted) {
        return Ok(i);
    }

    let hits: Vec<usize> = commits
        .iter()
        .enumerate()
        .filter(|(_, c)| !wanted.is_empty() && (c.hash.starts_with(wanted) || c.short_hash == wanted))
        .map(|(i, _)| i)
        .collect();

    match hits.as_slice() {
        [i] => Ok(*i),
        [] => Err(CommitLookupError::NotFound {
            wanted: wanted.to_string(),
            searched: commits.len(),
        }),
        _ => Err(CommitLookupError::Ambiguous {
            wanted: wanted.to_string(),
            matches: hits.iter().map(|&i| commits[i].short_hash.clone()).collect(),
        }),
    }
}

/// Read access to a file's history.
pub trait RevisionReader {
    /// Commits touching `path`, most recent first, at most `limit` of them.
    fn list_commits(&self, path: &Path, limit: usize) -> Result<Vec<Commit>, RevisionError>;

    /// Full text of `path` as of `revision`. Fails when the path is absent there.
    fn content_at_revision(&self, path: &Path, revision: &str) -> Result<String, RevisionError>;
}

/// [`RevisionReader`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    root: PathBuf,
}

impl GitCli {
    /// Locate the work tree containing `start` (a file or a directory).
    pub fn discover(start: &Path) -> Result<Self, RevisionError> {
        Self::discover_with(start, "git")
    }

    pub fn discover_with(start: &Path, program: &str) -> Result<Self, RevisionError> {
        let dir = if start.is_file() {
            start.parent().unwrap_or(start)
        } else {
            start
        };
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };

        let output = run_git(program, dir, &["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(RevisionError::NotARepository {
                path: start.to_path_buf(),
            });
        }

        let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let root = PathBuf::from(&top);
        let root = root.canonicalize().unwrap_or(root);
        debug!(root = %root.display(), "discovered git work tree");

        Ok(Self {
            program: program.to_string(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `start` (a file or a directory) is inside a git work tree.
    pub fn is_repository(start: &Path, program: &str) -> bool {
        let dir = if start.is_file() {
            start.parent().unwrap_or(start)
        } else {
            start
        };
        run_git(program, dir, &["rev-parse", "--is-inside-work-tree"])
            .map(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "true")
            .unwrap_or(false)
    }

    /// Repository-relative path with `/` separators, as git expects in `rev:path`.
    pub fn relative_path(&self, path: &Path) -> Result<String, RevisionError> {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let abs = canonicalize_lenient(&abs);

        let rel = abs
            .strip_prefix(&self.root)
            .map_err(|_| RevisionError::OutsideRepository {
                path: abs.clone(),
                root: self.root.clone(),
            })?;

        let mut out = rel.to_string_lossy().replace('\\', "/");
        if out.starts_with("./") {
            out = out.trim_start_matches("./").to_string();
        }
        Ok(out)
    }

    fn git(&self, args: &[&str]) -> Result<Output, RevisionError> {
        run_git(&self.program, &self.root, args)
    }

    fn git_ok(&self, args: &[&str]) -> Result<Vec<u8>, RevisionError> {
        let output = self.git(args)?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(RevisionError::Git {
            args: args.join(" "),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn has_head(&self) -> Result<bool, RevisionError> {
        Ok(self
            .git(&["rev-parse", "--verify", "--quiet", "HEAD"])?
            .status
            .success())
    }
}

impl RevisionReader for GitCli {
    fn list_commits(&self, path: &Path, limit: usize) -> Result<Vec<Commit>, RevisionError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        // A freshly initialised repository has no HEAD and `git log` errors out.
        if !self.has_head()? {
            return Ok(vec![]);
        }

        let rel = self.relative_path(path)?;
        let n = limit.to_string();
        let stdout = self.git_ok(&["log", "-n", &n, LOG_FORMAT, "--", &rel])?;
        let commits = parse_log(&String::from_utf8_lossy(&stdout));
        debug!(path = %rel, count = commits.len(), "listed commits");
        Ok(commits)
    }

    fn content_at_revision(&self, path: &Path, revision: &str) -> Result<String, RevisionError> {
        let revision = revision.trim();
        if revision.is_empty() || revision.starts_with('-') || revision.contains(':') {
            return Err(RevisionError::InvalidRevision(revision.to_string()));
        }

        let rel = self.relative_path(path)?;
        let object = format!("{revision}:{rel}");
        let output = self.git(&["cat-file", "blob", &object])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("does not exist") || stderr.contains("exists on disk, but not in") {
                return Err(RevisionError::MissingAtRevision {
                    path: rel,
                    revision: revision.to_string(),
                });
            }
            return Err(RevisionError::Git {
                args: format!("cat-file blob {object}"),
                status: output.status.to_string(),
                stderr,
            });
        }

        match String::from_utf8(output.stdout) {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(path = %rel, %revision, "blob is not valid UTF-8; decoding lossily");
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        }
    }
}

fn run_git(program: &str, dir: &Path, args: &[&str]) -> Result<Output, RevisionError> {
    debug!(dir = %dir.display(), ?args, "running git");
    Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|source| RevisionError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// Canonicalize, falling back to the parent directory when the file itself is gone.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

fn parse_log(stdout: &str) -> Vec<Commit> {
    stdout
        .split(RECORD_SEP)
        .filter_map(|record| {
            let record = record.trim_matches(|c| c == '\n' || c == '\r');
            if record.is_empty() {
                return None;
            }
            let mut fields = record.splitn(5, FIELD_SEP);
            let hash = fields.next()?.trim();
            if hash.is_empty() {
                return None;
            }
            Some(Commit {
                hash: hash.to_string(),
                short_hash: fields.next().unwrap_or("").trim().to_string(),
                author: fields.next().unwrap_or("").to_string(),
                date: fields.next().unwrap_or("").to_string(),
                message: fields.next().unwrap_or("").to_string(),
            })
        })
        .collect()
}
