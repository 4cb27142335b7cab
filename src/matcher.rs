use thiserror::Error;

use crate::entity::{CodeEntity, EntityKind};
use crate::extractor::{extract_entities, Grammar};

/// Decides which entity of a historical extraction corresponds to the one the
/// user picked in the current document.
pub trait MatchStrategy {
    fn find_match<'a>(&self, target: &CodeEntity, candidates: &'a [CodeEntity]) -> Option<&'a CodeEntity>;
}

/// Identity by `(name, kind)`; the first candidate in traversal order wins.
///
/// Cannot tell overloads or duplicate names apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameKindMatcher;

impl MatchStrategy for NameKindMatcher {
    fn find_match<'a>(&self, target: &CodeEntity, candidates: &'a [CodeEntity]) -> Option<&'a CodeEntity> {
        candidates.iter().find(|c| c.same_identity(target))
    }
}

pub fn find_match<'a>(target: &CodeEntity, candidates: &'a [CodeEntity]) -> Option<&'a CodeEntity> {
    NameKindMatcher.find_match(target, candidates)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { name: String, kind: EntityKind },

    #[error("{kind} \"{name}\" has a range outside the text it was extracted from")]
    BadRange { name: String, kind: EntityKind },
}

/// The historical text of an entity, ready to be written over the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// The matched entity, ranged against the historical text.
    pub historical: CodeEntity,
    pub text: String,
}

/// Extract `historical_text`, find the counterpart of `target`, and slice it out verbatim.
pub fn resolve_replacement(
    target: &CodeEntity,
    historical_text: &str,
    grammar: Grammar,
    strategy: &dyn MatchStrategy,
) -> Result<Replacement, MatchError> {
    let candidates = extract_entities(historical_text, grammar);
    let Some(found) = strategy.find_match(target, &candidates) else {
        return Err(MatchError::NotFound {
            name: target.name.clone(),
            kind: target.kind,
        });
    };

    let text = found.text(historical_text).ok_or_else(|| MatchError::BadRange {
        name: found.name.clone(),
        kind: found.kind,
    })?;

    Ok(Replacement {
        historical: found.clone(),
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ByteRange;

    fn entity(name: &str, kind: EntityKind, start: usize, end: usize) -> CodeEntity {
        CodeEntity::new(name, kind, ByteRange::new(start, end))
    }

    #[test]
    fn unique_match_found_at_any_position() {
        let target = entity("foo", EntityKind::Function, 500, 600);
        let others = [
            entity("bar", EntityKind::Function, 0, 10),
            entity("foo", EntityKind::Method, 10, 20),
            entity("baz", EntityKind::Class, 20, 30),
        ];
        for pos in 0..=others.len() {
            let mut list = others.to_vec();
            list.insert(pos, entity("foo", EntityKind::Function, 40, 50));
            let got = find_match(&target, &list).unwrap();
            assert_eq!(got.range, ByteRange::new(40, 50), "position {pos}");
        }
    }

    #[test]
    fn duplicate_identity_returns_first() {
        let target = entity("foo", EntityKind::Method, 0, 0);
        let list = [
            entity("foo", EntityKind::Method, 5, 9),
            entity("foo", EntityKind::Method, 12, 30),
        ];
        assert_eq!(find_match(&target, &list), Some(&list[0]));
    }

    #[test]
    fn kind_must_match_too() {
        let target = entity("Widget", EntityKind::Function, 0, 0);
        let list = [entity("Widget", EntityKind::Class, 0, 10)];
        assert_eq!(find_match(&target, &list), None);
    }

    #[test]
    fn replacement_is_sliced_from_historical_text() {
        let old = "// header\nfunction greet(name) {\n  return 'hi ' + name; // old\n}\n";
        let target = entity("greet", EntityKind::Function, 0, 42);
        let rep = resolve_replacement(&target, old, Grammar::TypeScript, &NameKindMatcher).unwrap();
        assert_eq!(rep.text, "function greet(name) {\n  return 'hi ' + name; // old\n}");
        assert_eq!(rep.historical.range.start, 10);
    }

    #[test]
    fn missing_entity_is_not_found() {
        let target = entity("gone", EntityKind::Function, 0, 0);
        let err = resolve_replacement(&target, "function here() {}", Grammar::TypeScript, &NameKindMatcher).unwrap_err();
        assert_eq!(
            err,
            MatchError::NotFound {
                name: "gone".into(),
                kind: EntityKind::Function
            }
        );
    }

    struct LastWins;

    impl MatchStrategy for LastWins {
        fn find_match<'a>(&self, target: &CodeEntity, candidates: &'a [CodeEntity]) -> Option<&'a CodeEntity> {
            candidates.iter().rev().find(|c| c.same_identity(target))
        }
    }

    #[test]
    fn strategy_is_pluggable() {
        let old = "class A { run() { return 1; } }\nclass B { run() { return 2; } }\n";
        let target = entity("run", EntityKind::Method, 0, 0);
        let first = resolve_replacement(&target, old, Grammar::TypeScript, &NameKindMatcher).unwrap();
        let last = resolve_replacement(&target, old, Grammar::TypeScript, &LastWins).unwrap();
        assert_eq!(first.text, "run() { return 1; }");
        assert_eq!(last.text, "run() { return 2; }");
    }
}
