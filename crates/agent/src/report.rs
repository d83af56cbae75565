//! Report editor
//!
//! A stateful Markdown document owned by one agent session. Every edit
//! either succeeds or returns an error without mutating state. Sections
//! are identified by case-insensitive partial match on heading text and
//! span from the heading to the next same-or-shallower heading. Once
//! finalized, the document rejects further edits.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Agent confidence level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

#[derive(Default)]
struct ReportState {
    content: String,
    finalized: Option<Confidence>,
}

/// Location of a section in the document, in line indexes.
struct SectionSpan {
    /// Line index of the heading
    heading: usize,
    /// One past the last body line
    end: usize,
}

/// The report editor.
#[derive(Default)]
pub struct ReportEditor {
    state: RwLock<ReportState>,
}

impl ReportEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> String {
        self.state.read().content.clone()
    }

    pub fn finalized(&self) -> Option<Confidence> {
        self.state.read().finalized
    }

    fn guard_editable(state: &ReportState) -> Result<(), String> {
        match state.finalized {
            Some(confidence) => Err(format!(
                "report already finalized with {} confidence",
                confidence.as_str()
            )),
            None => Ok(()),
        }
    }

    /// Replace the whole document.
    pub fn set(&self, text: &str) -> Result<(), String> {
        let mut state = self.state.write();
        Self::guard_editable(&state)?;
        state.content = text.to_string();
        Ok(())
    }

    /// Append text at the end.
    pub fn append(&self, text: &str) -> Result<(), String> {
        let mut state = self.state.write();
        Self::guard_editable(&state)?;
        if !state.content.is_empty() && !state.content.ends_with('\n') {
            state.content.push('\n');
        }
        state.content.push_str(text);
        Ok(())
    }

    /// Replace `old` with `new`. The match must be unique: exact first,
    /// then whitespace-normalised as the fuzzy fallback.
    pub fn replace(&self, old: &str, new: &str) -> Result<(), String> {
        let mut state = self.state.write();
        Self::guard_editable(&state)?;

        let exact_matches = state.content.matches(old).count();
        match exact_matches {
            1 => {
                state.content = state.content.replacen(old, new, 1);
                return Ok(());
            }
            n if n > 1 => {
                return Err(format!("replace target matches {} times; must be unique", n))
            }
            _ => {}
        }

        // Fuzzy fallback: compare with runs of whitespace collapsed.
        let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        let target = normalize(old);
        if target.is_empty() {
            return Err("replace target not found".to_string());
        }

        let content = state.content.clone();
        let mut candidates: Vec<(usize, usize)> = Vec::new();
        // Scan line-window candidates whose normalised form contains the
        // normalised target.
        let lines: Vec<&str> = content.lines().collect();
        let target_lines = old.lines().count().max(1);
        for start in 0..lines.len() {
            let end = (start + target_lines).min(lines.len());
            let window = lines[start..end].join("\n");
            if normalize(&window) == target {
                let offset: usize = lines[..start].iter().map(|l| l.len() + 1).sum();
                candidates.push((offset, window.len()));
            }
        }

        match candidates.len() {
            0 => Err("replace target not found".to_string()),
            1 => {
                let (offset, len) = candidates[0];
                state.content.replace_range(offset..offset + len, new);
                Ok(())
            }
            n => Err(format!("replace target matches {} times; must be unique", n)),
        }
    }

    /// Insert text right after the matched heading line.
    pub fn insert_after_heading(&self, heading: &str, text: &str) -> Result<(), String> {
        let mut state = self.state.write();
        Self::guard_editable(&state)?;

        let span = Self::find_section(&state.content, heading)?;
        let mut lines: Vec<String> = state.content.lines().map(String::from).collect();
        lines.insert(span.heading + 1, text.to_string());
        state.content = lines.join("\n");
        Ok(())
    }

    /// Replace a section's body, keeping the heading.
    pub fn replace_section(&self, heading: &str, text: &str) -> Result<(), String> {
        let mut state = self.state.write();
        Self::guard_editable(&state)?;

        let span = Self::find_section(&state.content, heading)?;
        let mut lines: Vec<String> = state.content.lines().map(String::from).collect();
        lines.splice(span.heading + 1..span.end, text.lines().map(String::from));
        state.content = lines.join("\n");
        Ok(())
    }

    /// Remove a section including its heading.
    pub fn delete_section(&self, heading: &str) -> Result<(), String> {
        let mut state = self.state.write();
        Self::guard_editable(&state)?;

        let span = Self::find_section(&state.content, heading)?;
        let mut lines: Vec<String> = state.content.lines().map(String::from).collect();
        lines.drain(span.heading..span.end);
        state.content = lines.join("\n");
        Ok(())
    }

    /// Mark the report final; later edits fail.
    pub fn finalize(&self, confidence: Confidence) -> Result<(), String> {
        let mut state = self.state.write();
        Self::guard_editable(&state)?;
        state.finalized = Some(confidence);
        Ok(())
    }

    fn heading_level(line: &str) -> Option<usize> {
        let hashes = line.chars().take_while(|c| *c == '#').count();
        (hashes > 0 && line.chars().nth(hashes) == Some(' ')).then_some(hashes)
    }

    /// Case-insensitive partial match on heading text; ambiguous matches
    /// are an error. The section runs to the next heading of the same or
    /// shallower level.
    fn find_section(content: &str, heading: &str) -> Result<SectionSpan, String> {
        let needle = heading.to_lowercase();
        let lines: Vec<&str> = content.lines().collect();

        let matches: Vec<(usize, usize)> = lines
            .iter()
            .enumerate()
            .filter_map(|(index, line)| {
                let level = Self::heading_level(line)?;
                line.to_lowercase().contains(&needle).then_some((index, level))
            })
            .collect();

        let (heading_index, level) = match matches.len() {
            0 => return Err(format!("no heading matches `{}`", heading)),
            1 => matches[0],
            n => {
                return Err(format!(
                    "heading `{}` is ambiguous ({} matches)",
                    heading, n
                ))
            }
        };

        let end = lines
            .iter()
            .enumerate()
            .skip(heading_index + 1)
            .find_map(|(index, line)| {
                Self::heading_level(line)
                    .filter(|next_level| *next_level <= level)
                    .map(|_| index)
            })
            .unwrap_or(lines.len());

        Ok(SectionSpan {
            heading: heading_index,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = "# Report\nintro\n\n## Findings\nfact one\nfact two\n\n## Open Questions\nnone yet\n";

    fn editor() -> ReportEditor {
        let editor = ReportEditor::new();
        editor.set(DOCUMENT).unwrap();
        editor
    }

    #[test]
    fn test_set_and_append() {
        let editor = ReportEditor::new();
        editor.set("# Title").unwrap();
        editor.append("more").unwrap();
        assert_eq!(editor.content(), "# Title\nmore");
    }

    #[test]
    fn test_replace_unique() {
        let editor = editor();
        editor.replace("fact one", "fact 1").unwrap();
        assert!(editor.content().contains("fact 1"));
        assert!(!editor.content().contains("fact one"));
    }

    #[test]
    fn test_replace_ambiguous_fails_without_mutation() {
        let editor = ReportEditor::new();
        editor.set("dup\ndup\n").unwrap();
        let err = editor.replace("dup", "x").unwrap_err();
        assert!(err.contains("unique"));
        assert_eq!(editor.content(), "dup\ndup\n");
    }

    #[test]
    fn test_replace_fuzzy_whitespace() {
        let editor = ReportEditor::new();
        editor.set("alpha   beta\ngamma\n").unwrap();
        editor.replace("alpha beta", "delta").unwrap();
        assert!(editor.content().starts_with("delta"));
    }

    #[test]
    fn test_insert_after_heading_partial_case_insensitive() {
        let editor = editor();
        editor.insert_after_heading("findings", "inserted line").unwrap();
        let content = editor.content();
        let heading_at = content.find("## Findings").unwrap();
        let inserted_at = content.find("inserted line").unwrap();
        let fact_at = content.find("fact one").unwrap();
        assert!(heading_at < inserted_at && inserted_at < fact_at);
    }

    #[test]
    fn test_replace_section_keeps_heading() {
        let editor = editor();
        editor.replace_section("Findings", "rewritten").unwrap();
        let content = editor.content();
        assert!(content.contains("## Findings\nrewritten"));
        assert!(!content.contains("fact one"));
        // The next section is untouched.
        assert!(content.contains("## Open Questions\nnone yet"));
    }

    #[test]
    fn test_delete_section() {
        let editor = editor();
        editor.delete_section("open questions").unwrap();
        let content = editor.content();
        assert!(!content.contains("Open Questions"));
        assert!(content.contains("fact two"));
    }

    #[test]
    fn test_section_spans_to_same_or_shallower_heading() {
        let editor = ReportEditor::new();
        editor
            .set("# A\n## B\nbody b\n### C\nbody c\n## D\nbody d\n")
            .unwrap();
        // Section B includes its subsection C but stops at D.
        editor.delete_section("B").unwrap();
        let content = editor.content();
        assert!(!content.contains("body b"));
        assert!(!content.contains("body c"));
        assert!(content.contains("## D"));
    }

    #[test]
    fn test_unknown_heading_errors() {
        let editor = editor();
        assert!(editor.replace_section("nonexistent", "x").is_err());
        assert_eq!(editor.content(), DOCUMENT.trim_end_matches('\n').to_string() + "\n");
    }

    #[test]
    fn test_finalize_blocks_edits() {
        let editor = editor();
        editor.finalize(Confidence::High).unwrap();
        assert_eq!(editor.finalized(), Some(Confidence::High));

        let err = editor.append("more").unwrap_err();
        assert!(err.contains("finalized"));
        // Double-finalize also fails.
        assert!(editor.finalize(Confidence::Low).is_err());
    }
}
