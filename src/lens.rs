use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tracing::debug;

use crate::document::{Document, DocumentId, Position};
use crate::entity::CodeEntity;
use crate::extractor::{extract_entities, Grammar};

pub const RECOVER_COMMAND: &str = "git-rescue.recoverEntity";

/// Arguments the editor passes back when the lens is clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverArgs {
    pub document: DocumentId,
    pub entity: CodeEntity,
}

/// One inline "recover" affordance, anchored at the entity's first character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverLens {
    pub position: Position,
    pub title: String,
    pub command: String,
    pub arguments: RecoverArgs,
}

pub fn lens_title(entity: &CodeEntity) -> String {
    format!("Recover {} \"{}\" from commit…", entity.kind, entity.name)
}

/// Build lenses for every entity of `doc`. Unsupported documents get none.
pub fn build_lenses(doc: &Document, grammar: Option<Grammar>) -> Vec<RecoverLens> {
    let Some(grammar) = grammar.or_else(|| doc.grammar()) else {
        return vec![];
    };

    extract_entities(doc.text(), grammar)
        .into_iter()
        .map(|entity| RecoverLens {
            position: doc.position_at(entity.range.start),
            title: lens_title(&entity),
            command: RECOVER_COMMAND.to_string(),
            arguments: RecoverArgs {
                document: doc.id().clone(),
                entity,
            },
        })
        .collect()
}

/// Editor events that invalidate a document's lenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentEvent {
    #[serde(alias = "open")]
    Opened,
    #[serde(alias = "save")]
    Saved,
    #[serde(alias = "active")]
    ActiveEditorChanged,
    #[serde(alias = "close")]
    Closed,
}

#[derive(Debug)]
struct CachedLenses {
    fingerprint: u64,
    lenses: Vec<RecoverLens>,
}

/// Per-document lens cache. Entries are rebuilt on demand and dropped by
/// explicit [`DocumentEvent`]s; a text fingerprint guards against serving
/// lenses computed for different contents.
#[derive(Debug, Default)]
pub struct LensProvider {
    grammar: Option<Grammar>,
    cache: HashMap<DocumentId, CachedLenses>,
}

impl LensProvider {
    pub fn new(grammar: Option<Grammar>) -> Self {
        Self {
            grammar,
            cache: HashMap::new(),
        }
    }

    pub fn provide(&mut self, doc: &Document) -> &[RecoverLens] {
        let fingerprint = fingerprint(doc.text());
        let stale = self
            .cache
            .get(doc.id())
            .map_or(true, |c| c.fingerprint != fingerprint);

        if stale {
            debug!(document = %doc.id(), "rebuilding lenses");
            let lenses = build_lenses(doc, self.grammar);
            self.cache.insert(doc.id().clone(), CachedLenses { fingerprint, lenses });
        }

        self.cache
            .get(doc.id())
            .map(|c| c.lenses.as_slice())
            .unwrap_or(&[])
    }

    pub fn notify(&mut self, id: &DocumentId, event: DocumentEvent) {
        if self.cache.remove(id).is_some() {
            debug!(document = %id, ?event, "invalidated lenses");
        }
    }

    pub fn is_cached(&self, id: &DocumentId) -> bool {
        self.cache.contains_key(id)
    }
}

fn fingerprint(text: &str) -> u64 {
    let mut h = DefaultHasher::new();
    text.hash(&mut h);
    h.finish()
}
