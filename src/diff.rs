use serde::Serialize;
use similar::{DiffTag, TextDiff};

use crate::entity::CodeEntity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowTag {
    Equal,
    Removed,
    Added,
    Changed,
}

/// One line of a side-by-side comparison; either side may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffRow {
    pub tag: RowTag,
    pub left: Option<String>,
    pub right: Option<String>,
}

/// Historical (left) vs current (right) text of one entity.
///
/// Lives only for the duration of a recovery flow; nothing is written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffView {
    pub title: String,
    pub left_label: String,
    pub right_label: String,
    pub left: String,
    pub right: String,
}

impl DiffView {
    pub fn for_entity(entity: &CodeEntity, commit: &str, historical: &str, current: &str) -> Self {
        Self {
            title: format!(
                "Diff: {} \"{}\" (commit {}) ↔ Current",
                entity.kind, entity.name, commit
            ),
            left_label: format!("{}-from-commit", entity.name),
            right_label: format!("{}-current", entity.name),
            left: historical.to_string(),
            right: current.to_string(),
        }
    }

    pub fn is_identical(&self) -> bool {
        self.left == self.right
    }

    pub fn unified(&self, context_lines: usize) -> String {
        TextDiff::from_lines(&self.left, &self.right)
            .unified_diff()
            .context_radius(context_lines)
            .header(&self.left_label, &self.right_label)
            .to_string()
    }

    pub fn rows(&self) -> Vec<DiffRow> {
        let diff = TextDiff::from_lines(&self.left, &self.right);
        let old = diff.old_slices();
        let new = diff.new_slices();
        let line = |s: &str| s.trim_end_matches(&['\n', '\r'][..]).to_string();

        let mut rows: Vec<DiffRow> = Vec::new();
        for op in diff.ops() {
            let (tag, old_range, new_range) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => {
                    for (o, n) in old_range.zip(new_range) {
                        rows.push(DiffRow {
                            tag: RowTag::Equal,
                            left: Some(line(old[o])),
                            right: Some(line(new[n])),
                        });
                    }
                }
                DiffTag::Delete => {
                    for o in old_range {
                        rows.push(DiffRow {
                            tag: RowTag::Removed,
                            left: Some(line(old[o])),
                            right: None,
                        });
                    }
                }
                DiffTag::Insert => {
                    for n in new_range {
                        rows.push(DiffRow {
                            tag: RowTag::Added,
                            left: None,
                            right: Some(line(new[n])),
                        });
                    }
                }
                DiffTag::Replace => {
                    let height = old_range.len().max(new_range.len());
                    for i in 0..height {
                        let left = old_range.clone().nth(i).map(|o| line(old[o]));
                        let right = new_range.clone().nth(i).map(|n| line(new[n]));
                        let tag = match (&left, &right) {
                            (Some(_), Some(_)) => RowTag::Changed,
                            (Some(_), None) => RowTag::Removed,
                            _ => RowTag::Added,
                        };
                        rows.push(DiffRow { tag, left, right });
                    }
                }
            }
        }
        rows
    }

    /// Plain-text two-column rendering for terminals. Each column is `width`
    /// characters wide; longer lines are cut with `…`.
    pub fn side_by_side(&self, width: usize) -> String {
        let width = width.max(8);
        let mut out = String::new();
        out.push_str(&self.title);
        out.push('\n');
        out.push_str(&format!(
            "  {} │   {}\n",
            fit(&self.left_label, width),
            self.right_label
        ));
        out.push_str(&format!("{}┼{}\n", "─".repeat(width + 3), "─".repeat(width + 3)));

        for row in self.rows() {
            let marker = match row.tag {
                RowTag::Equal => ' ',
                RowTag::Removed => '-',
                RowTag::Added => '+',
                RowTag::Changed => '~',
            };
            let left = row.left.as_deref().unwrap_or("");
            let right = row.right.as_deref().unwrap_or("");
            out.push_str(&format!("{marker} {} │ {marker} {}\n", fit(left, width), right));
        }
        out
    }
}

fn fit(s: &str, width: usize) -> String {
    let s = s.replace('\t', "    ");
    let count = s.chars().count();
    if count <= width {
        format!("{s}{}", " ".repeat(width - count))
    } else {
        let mut cut: String = s.chars().take(width - 1).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ByteRange, EntityKind};

    fn view(left: &str, right: &str) -> DiffView {
        let e = CodeEntity::new("sum", EntityKind::Function, ByteRange::new(0, 0));
        DiffView::for_entity(&e, "abc1234", left, right)
    }

    #[test]
    fn title_names_kind_entity_and_commit() {
        let v = view("a", "a");
        assert_eq!(v.title, "Diff: function \"sum\" (commit abc1234) ↔ Current");
        assert_eq!(v.left_label, "sum-from-commit");
        assert_eq!(v.right_label, "sum-current");
        assert!(v.is_identical());
    }

    #[test]
    fn unified_diff_marks_changed_lines() {
        let v = view(
            "function sum(a, b) {\n  return a + b;\n}",
            "function sum(a, b) {\n  return a - b;\n}",
        );
        let text = v.unified(3);
        assert!(text.contains("--- sum-from-commit"), "{text}");
        assert!(text.contains("+++ sum-current"), "{text}");
        assert!(text.contains("-  return a + b;"), "{text}");
        assert!(text.contains("+  return a - b;"), "{text}");
    }

    #[test]
    fn rows_pair_up_replacements() {
        let v = view("a\nb\nc\n", "a\nB\nc\nd\n");
        let rows = v.rows();
        let tags: Vec<RowTag> = rows.iter().map(|r| r.tag).collect();
        assert_eq!(tags, [RowTag::Equal, RowTag::Changed, RowTag::Equal, RowTag::Added]);
        assert_eq!(rows[1].left.as_deref(), Some("b"));
        assert_eq!(rows[1].right.as_deref(), Some("B"));
        assert_eq!(rows[3].left, None);
    }

    #[test]
    fn side_by_side_truncates_long_lines() {
        let v = view("short\n", "a much longer line than the column\n");
        let text = v.side_by_side(10);
        assert!(text.starts_with("Diff: function \"sum\""));
        assert!(text.contains("~ short      │ ~ a much longer line than the column"), "{text}");

        let v = view("a much longer line than the column\n", "x\n");
        assert!(v.side_by_side(10).contains("a much lo…"));
    }
}
