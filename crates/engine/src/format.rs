//! Format stage — renders selected fragments into task-ordered sections.
//!
//! Fragments are grouped by kind. Groups are ordered by a per-task-type
//! preference table; kinds the table does not mention follow in kind order.
//! Within a group, fragments keep their selection order.

use contextloom_core::error::FormatError;
use contextloom_core::fragment::{Fragment, FragmentKind};
use contextloom_core::package::Section;
use contextloom_core::request::{Request, TaskType};
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::warn;

use FragmentKind::*;

/// Preferred section order for a task type.
pub fn section_order(task_type: TaskType) -> &'static [FragmentKind] {
    match task_type {
        TaskType::CodeGeneration => &[
            TaskDescription,
            CodeStructure,
            DomainPatterns,
            Dependencies,
            Examples,
            Configuration,
        ],
        TaskType::BugFixing => &[RuntimeErrors, Implementation, Logs, Dependencies, RuntimeState],
        TaskType::Refactoring => &[CodeStructure, Implementation, DomainPatterns, TestCode, Dependencies],
        TaskType::CodeReview => &[Implementation, BestPractices, DomainPatterns, TestCode, Dependencies],
        TaskType::SecurityAnalysis => &[Implementation, Configuration, Dependencies, BestPractices, Environment],
        TaskType::TestGeneration => &[Implementation, TestCode, Examples, CodeStructure],
        TaskType::Documentation | TaskType::Explanation => {
            &[CodeStructure, Documentation, Examples, DomainKnowledge]
        }
        TaskType::General => &[TaskDescription, CodeStructure, Implementation, Documentation],
    }
}

/// The format stage.
#[derive(Debug, Clone, Default)]
pub struct FormatStage;

impl FormatStage {
    pub fn new() -> Self {
        Self
    }

    /// Render `fragments` into sections for `request`.
    pub fn format(&self, fragments: &[Fragment], request: &Request) -> Result<Vec<Section>, FormatError> {
        let mut groups: BTreeMap<FragmentKind, Vec<&Fragment>> = BTreeMap::new();
        for fragment in fragments {
            groups.entry(fragment.kind).or_default().push(fragment);
        }

        let preferred = section_order(request.task_type);
        let mut ordered: Vec<(FragmentKind, Vec<&Fragment>)> = Vec::with_capacity(groups.len());
        for kind in preferred {
            if let Some(group) = groups.remove(kind) {
                ordered.push((*kind, group));
            }
        }
        ordered.extend(groups);

        let mut sections = Vec::with_capacity(ordered.len());
        for (kind, group) in ordered {
            if let Some(section) = render_section(kind, &group)? {
                sections.push(section);
            }
        }
        Ok(sections)
    }
}

fn render_section(kind: FragmentKind, group: &[&Fragment]) -> Result<Option<Section>, FormatError> {
    let title = kind.title();
    let mut content = String::new();
    let mut rendered = 0usize;

    writeln!(content, "## {title}")?;
    for fragment in group {
        if fragment.content.trim().is_empty() {
            warn!(fragment = %fragment.id, source = %fragment.source, "Skipping fragment with empty content");
            continue;
        }

        writeln!(content)?;
        writeln!(content, "### From {}", fragment.source)?;
        if !fragment.metadata.is_empty() {
            let pairs = fragment
                .metadata
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(content, "Metadata: {pairs}")?;
        }
        writeln!(content)?;
        writeln!(content, "{}", fragment.content.trim_end())?;
        rendered += 1;
    }

    if rendered == 0 {
        warn!(section = %title, "Section has no renderable fragments, skipping it");
        return Ok(None);
    }

    Ok(Some(Section { kind, title, content }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextloom_core::fragment::FragmentKind::*;

    fn frag(kind: FragmentKind, source: &str, content: &str) -> Fragment {
        Fragment::builder(source, kind, content).build()
    }

    fn kinds(sections: &[Section]) -> Vec<FragmentKind> {
        sections.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn bug_fixing_puts_errors_first() {
        let req = Request::builder("fix").task_type(TaskType::BugFixing).build();
        let frags = vec![
            frag(Logs, "logs", "log output"),
            frag(Implementation, "files", "fn broken() {}"),
            frag(RuntimeErrors, "errors", "panicked at src/lib.rs:10"),
        ];
        let sections = FormatStage::new().format(&frags, &req).unwrap();
        assert_eq!(kinds(&sections), vec![RuntimeErrors, Implementation, Logs]);
    }

    #[test]
    fn unlisted_kinds_follow_in_kind_order() {
        let req = Request::builder("gen").task_type(TaskType::CodeGeneration).build();
        let frags = vec![
            frag(Experience, "exp", "learned something"),
            frag(VcsDiff, "git", "+ added line"),
            frag(CodeStructure, "files", "mod a;"),
        ];
        let sections = FormatStage::new().format(&frags, &req).unwrap();
        assert_eq!(kinds(&sections), vec![CodeStructure, VcsDiff, Experience]);
    }

    #[test]
    fn section_renders_heading_source_metadata_and_content() {
        let req = Request::builder("t").build();
        let f = Fragment::builder("files", Implementation, "fn main() {}\n")
            .metadata("path", "src/main.rs")
            .metadata("lines", "1")
            .build();
        let sections = FormatStage::new().format(&[f], &req).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Implementation");
        assert_eq!(
            sections[0].content,
            "## Implementation\n\n### From files\nMetadata: lines=1, path=src/main.rs\n\nfn main() {}\n"
        );
    }

    #[test]
    fn group_keeps_selection_order() {
        let req = Request::builder("t").build();
        let frags = vec![
            frag(Logs, "second-source", "b"),
            frag(Logs, "first-source", "a"),
        ];
        let sections = FormatStage::new().format(&frags, &req).unwrap();
        let content = &sections[0].content;
        assert!(content.find("second-source").unwrap() < content.find("first-source").unwrap());
    }

    #[test]
    fn blank_fragments_are_skipped() {
        let req = Request::builder("t").build();
        let frags = vec![frag(Logs, "empty", "   "), frag(Documentation, "docs", "readme")];
        let sections = FormatStage::new().format(&frags, &req).unwrap();
        assert_eq!(kinds(&sections), vec![Documentation]);
    }

    #[test]
    fn every_task_type_has_a_table() {
        for task_type in [
            TaskType::CodeGeneration,
            TaskType::BugFixing,
            TaskType::Refactoring,
            TaskType::CodeReview,
            TaskType::SecurityAnalysis,
            TaskType::TestGeneration,
            TaskType::Documentation,
            TaskType::Explanation,
            TaskType::General,
        ] {
            assert!(!section_order(task_type).is_empty());
        }
    }
}
