//! The recover flow: pick a commit, fetch the file at that commit, find the
//! entity there, show the diff, and on confirmation replace the entity in the
//! current document.
//!
//! The flow is a straight line of states. Any empty result, cancellation or
//! failed lookup ends it in [`RecoveryState::NoOp`]; nothing is mutated until
//! the single edit in the final step.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::diff::DiffView;
use crate::document::Document;
use crate::entity::{ByteRange, CodeEntity};
use crate::extractor::{extract_entities, Grammar};
use crate::matcher::{resolve_replacement, MatchError, MatchStrategy};
use crate::revision::{Commit, RevisionReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryState {
    Idle,
    EntitiesExtracted,
    CommitListed,
    CommitPicked,
    HistoricalFetched,
    MatchResolved,
    DiffShown,
    Confirmed,
    Rejected,
    Applied,
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoOpReason {
    UnsupportedDocument,
    EntityNotInDocument,
    HistoryFailed { cause: String },
    NoHistory,
    Cancelled,
    FetchFailed { commit: String, cause: String },
    NotFound { commit: String },
    Rejected,
    StaleRange,
    EditFailed { cause: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// The interactive side of the flow. Returning `None` from a prompt cancels.
pub trait RecoveryHost {
    fn pick_commit(&mut self, entity: &CodeEntity, commits: &[Commit]) -> Option<usize>;

    /// Present the comparison; returns once the user is done looking at it.
    fn show_diff(&mut self, view: &DiffView);

    fn confirm(&mut self, prompt: &str) -> Option<bool>;

    fn notify(&mut self, level: NoticeLevel, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecoveryResult {
    Applied {
        commit: String,
        /// Range in the current document that was replaced.
        range: ByteRange,
        replacement: String,
    },
    NoOp(NoOpReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryOutcome {
    pub trail: Vec<RecoveryState>,
    pub result: RecoveryResult,
}

impl RecoveryOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self.result, RecoveryResult::Applied { .. })
    }

    pub fn final_state(&self) -> RecoveryState {
        self.trail.last().copied().unwrap_or(RecoveryState::Idle)
    }
}

pub struct Recovery<'a> {
    reader: &'a dyn RevisionReader,
    strategy: &'a dyn MatchStrategy,
    grammar: Option<Grammar>,
    commit_limit: usize,
}

struct Flow {
    trail: Vec<RecoveryState>,
}

impl Flow {
    fn enter(&mut self, state: RecoveryState) {
        debug!(?state, "recovery transition");
        self.trail.push(state);
    }

    fn noop(mut self, reason: NoOpReason) -> RecoveryOutcome {
        info!(?reason, "recovery ended without changes");
        self.trail.push(RecoveryState::NoOp);
        RecoveryOutcome {
            trail: self.trail,
            result: RecoveryResult::NoOp(reason),
        }
    }
}

impl<'a> Recovery<'a> {
    pub fn new(reader: &'a dyn RevisionReader, strategy: &'a dyn MatchStrategy) -> Self {
        Self {
            reader,
            strategy,
            grammar: None,
            commit_limit: 20,
        }
    }

    /// Pin a grammar instead of inferring it from the document path.
    pub fn with_grammar(mut self, grammar: Option<Grammar>) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn with_commit_limit(mut self, limit: usize) -> Self {
        self.commit_limit = limit;
        self
    }

    /// Run the whole flow for `target`, an entity previously extracted from `doc`.
    pub fn run(&self, doc: &mut Document, target: &CodeEntity, host: &mut dyn RecoveryHost) -> RecoveryOutcome {
        let mut flow = Flow {
            trail: vec![RecoveryState::Idle],
        };

        let Some(grammar) = self.grammar.or_else(|| doc.grammar()) else {
            return flow.noop(NoOpReason::UnsupportedDocument);
        };

        let selected = match self.locate(doc, target, grammar) {
            Ok(e) => e,
            Err(NoOpReason::StaleRange) => {
                host.notify(
                    NoticeLevel::Warning,
                    &format!(
                        "{} \"{}\" occurs more than once and has moved since it was selected; nothing was replaced",
                        target.kind, target.name
                    ),
                );
                return flow.noop(NoOpReason::StaleRange);
            }
            Err(reason) => {
                host.notify(
                    NoticeLevel::Warning,
                    &format!("Entity \"{}\" no longer exists in {}", target.name, doc.id()),
                );
                return flow.noop(reason);
            }
        };
        let Some(current_text) = doc.slice(selected.range).map(str::to_string) else {
            return flow.noop(NoOpReason::EntityNotInDocument);
        };
        flow.enter(RecoveryState::EntitiesExtracted);

        let commits = match self.reader.list_commits(doc.path(), self.commit_limit) {
            Ok(c) => c,
            Err(e) => {
                host.notify(NoticeLevel::Error, &format!("Failed to read history: {e}"));
                return flow.noop(NoOpReason::HistoryFailed { cause: e.to_string() });
            }
        };
        if commits.is_empty() {
            host.notify(NoticeLevel::Info, "No commits found for this file.");
            return flow.noop(NoOpReason::NoHistory);
        }
        flow.enter(RecoveryState::CommitListed);

        let Some(commit) = host.pick_commit(&selected, &commits).and_then(|i| commits.get(i)) else {
            return flow.noop(NoOpReason::Cancelled);
        };
        flow.enter(RecoveryState::CommitPicked);

        let historical_text = match self.reader.content_at_revision(doc.path(), &commit.hash) {
            Ok(t) => t,
            Err(e) => {
                host.notify(
                    NoticeLevel::Error,
                    &format!("Failed to get file content at commit {}: {e}", commit.hash),
                );
                return flow.noop(NoOpReason::FetchFailed {
                    commit: commit.hash.clone(),
                    cause: e.to_string(),
                });
            }
        };
        flow.enter(RecoveryState::HistoricalFetched);

        let replacement = match resolve_replacement(&selected, &historical_text, grammar, self.strategy) {
            Ok(r) => r,
            Err(MatchError::NotFound { .. }) | Err(MatchError::BadRange { .. }) => {
                host.notify(
                    NoticeLevel::Warning,
                    &format!("Entity \"{}\" not found in commit {}", selected.name, commit.hash),
                );
                return flow.noop(NoOpReason::NotFound {
                    commit: commit.hash.clone(),
                });
            }
        };
        flow.enter(RecoveryState::MatchResolved);

        let view = DiffView::for_entity(&selected, &commit.hash, &replacement.text, &current_text);
        host.show_diff(&view);
        flow.enter(RecoveryState::DiffShown);

        let prompt = format!(
            "Replace current {} \"{}\" with selected commit version?",
            selected.kind, selected.name
        );
        if host.confirm(&prompt) != Some(true) {
            flow.enter(RecoveryState::Rejected);
            return flow.noop(NoOpReason::Rejected);
        }
        flow.enter(RecoveryState::Confirmed);

        let Some(range) = revalidate_range(doc, &selected, &current_text, grammar, self.strategy) else {
            host.notify(
                NoticeLevel::Warning,
                &format!(
                    "{} \"{}\" changed while recovering; nothing was replaced",
                    selected.kind, selected.name
                ),
            );
            return flow.noop(NoOpReason::StaleRange);
        };

        if let Err(e) = doc.replace(range, &replacement.text) {
            host.notify(NoticeLevel::Error, &format!("Failed to apply recovery: {e}"));
            return flow.noop(NoOpReason::EditFailed { cause: e.to_string() });
        }
        flow.enter(RecoveryState::Applied);
        info!(entity = %selected.label(), commit = %commit.hash, %range, "recovered entity");

        RecoveryOutcome {
            trail: flow.trail,
            result: RecoveryResult::Applied {
                commit: commit.hash.clone(),
                range,
                replacement: replacement.text,
            },
        }
    }

    /// Find `target` in the current text. An exact hit keeps the caller's
    /// range; otherwise the entity is relocated by identity.
    ///
    /// A pinned range (non-empty) that went stale cannot be relocated when the
    /// identity is shared by several entities: that ends in `StaleRange`.
    fn locate(&self, doc: &Document, target: &CodeEntity, grammar: Grammar) -> Result<CodeEntity, NoOpReason> {
        let current = extract_entities(doc.text(), grammar);
        if current.iter().any(|e| e == target) {
            return Ok(target.clone());
        }

        let pinned = !target.range.is_empty();
        let same = current.iter().filter(|e| e.same_identity(target)).count();
        if pinned && same > 1 {
            warn!(entity = %target.label(), from = %target.range, candidates = same, "ambiguous stale selection");
            return Err(NoOpReason::StaleRange);
        }

        let found = self
            .strategy
            .find_match(target, &current)
            .cloned()
            .ok_or(NoOpReason::EntityNotInDocument)?;
        if pinned {
            warn!(entity = %target.label(), from = %target.range, to = %found.range, "entity moved since selection");
        }
        Ok(found)
    }
}

/// The range to write to at apply time.
///
/// If `selected.range` still holds `expected_text` it is used as is. Otherwise the
/// document is re-extracted and the entity located again; its fresh range is used
/// only if it still holds `expected_text`, so edits made to the entity itself
/// during the flow are never overwritten.
///
/// With several entities of the same identity, exactly one of them must still
/// hold `expected_text`; anything else is ambiguous and yields `None`.
pub fn revalidate_range(
    doc: &Document,
    selected: &CodeEntity,
    expected_text: &str,
    grammar: Grammar,
    strategy: &dyn MatchStrategy,
) -> Option<ByteRange> {
    if doc.slice(selected.range) == Some(expected_text) {
        return Some(selected.range);
    }

    let fresh = extract_entities(doc.text(), grammar);
    let same: Vec<&CodeEntity> = fresh.iter().filter(|e| e.same_identity(selected)).collect();
    let found = if same.len() > 1 {
        let holding: Vec<&CodeEntity> = same
            .into_iter()
            .filter(|e| doc.slice(e.range) == Some(expected_text))
            .collect();
        match holding.as_slice() {
            [one] => *one,
            _ => return None,
        }
    } else {
        strategy.find_match(selected, &fresh)?
    };

    if doc.slice(found.range) == Some(expected_text) {
        debug!(entity = %selected.label(), to = %found.range, "relocated entity before applying");
        Some(found.range)
    } else {
        None
    }
}
