//! Completeness validator (C13): detects unfilled placeholder content left
//! behind by the generator and auto-fills a small set of known section
//! types with generic, freshly authored text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::GeneratedSection;

const SHORT_CONTENT_THRESHOLD: usize = 300;

static BRACKETED_INSTRUCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[.*?(write|fill|complete|insert|enter|add|provide|escriba|complete|llene|inserte|coloque|ingrese|agregue).*?\]").unwrap()
});
static PARENTHESIZED_DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\((complete|fill in|insert|add|completar|llenar|insertar|agregar)\b.*?\)").unwrap()
});
static TEMPLATE_VAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{.*?\}\}").unwrap());
static NUMBERING_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+|[IVXLCM]+)[.)]\s*").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Empty,
    BracketedInstruction,
    ParenthesizedDirective,
    TemplateVariable,
    ShortInstructionLike,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessIssue {
    pub section_id: String,
    pub path: String,
    pub kind: IssueKind,
    pub sample: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionCategory {
    Dedication,
    Acknowledgement,
    Abbreviations,
    Unknown,
}

/// Detect placeholder content across `sections`, in the precedence order
/// documented on each rule. The first matching rule wins per section.
pub fn detect_placeholders(sections: &[GeneratedSection]) -> Vec<CompletenessIssue> {
    sections.iter().filter_map(|section| detect_one(section)).collect()
}

fn detect_one(section: &GeneratedSection) -> Option<CompletenessIssue> {
    let trimmed = section.content.trim();

    if trimmed.is_empty() {
        return Some(issue(section, IssueKind::Empty, ""));
    }
    if let Some(m) = BRACKETED_INSTRUCTION_RE.find(trimmed) {
        return Some(issue(section, IssueKind::BracketedInstruction, m.as_str()));
    }
    if let Some(m) = PARENTHESIZED_DIRECTIVE_RE.find(trimmed) {
        return Some(issue(section, IssueKind::ParenthesizedDirective, m.as_str()));
    }
    if let Some(m) = TEMPLATE_VAR_RE.find(trimmed) {
        return Some(issue(section, IssueKind::TemplateVariable, m.as_str()));
    }
    if trimmed.len() < SHORT_CONTENT_THRESHOLD && looks_like_instruction(trimmed) {
        return Some(issue(section, IssueKind::ShortInstructionLike, trimmed));
    }
    None
}

fn issue(section: &GeneratedSection, kind: IssueKind, sample: &str) -> CompletenessIssue {
    CompletenessIssue { section_id: section.section_id.clone(), path: section.path.clone(), kind, sample: sample.to_string() }
}

fn looks_like_instruction(text: &str) -> bool {
    let lowered = text.to_lowercase();
    [
        "write a",
        "fill in",
        "add the",
        "insert the",
        "to be completed",
        "provide a",
        "escriba",
        "llene",
        "inserte",
        "coloque",
        "ingrese",
        "agregue",
    ]
    .iter()
    .any(|phrase| lowered.contains(phrase))
}

/// Classify `path`'s final segment into a known autofill category, after
/// stripping a leading numbering prefix (`"1. "`, `"I. "`, …).
fn classify(path: &str) -> SectionCategory {
    let last = path.rsplit('/').next().unwrap_or(path);
    let stripped = NUMBERING_PREFIX_RE.replace(last, "").to_lowercase();

    if stripped.contains("dedicat") {
        SectionCategory::Dedication
    } else if stripped.contains("acknowledg") || stripped.contains("agradecimi") {
        SectionCategory::Acknowledgement
    } else if stripped.contains("abbreviation") || stripped.contains("abreviatura") || stripped.contains("acronym") {
        SectionCategory::Abbreviations
    } else {
        SectionCategory::Unknown
    }
}

fn autofill_text(category: SectionCategory) -> &'static str {
    match category {
        SectionCategory::Dedication => {
            "This work is dedicated to those whose support and encouragement made its completion possible."
        }
        SectionCategory::Acknowledgement => {
            "The author wishes to thank the individuals and institutions who contributed guidance, resources, and support throughout this project."
        }
        SectionCategory::Abbreviations => "No abbreviations were identified for this document.",
        SectionCategory::Unknown => "",
    }
}

/// Replace placeholder content in known section types with generic
/// autofill text. Returns the autofilled sections alongside the issues
/// that remain unresolved (residual warnings for unknown section types).
pub fn autofill(
    mut sections: Vec<GeneratedSection>,
    issues: &[CompletenessIssue],
) -> (Vec<GeneratedSection>, Vec<CompletenessIssue>) {
    use std::collections::HashMap;
    let by_id: HashMap<&str, &CompletenessIssue> = issues.iter().map(|issue| (issue.section_id.as_str(), issue)).collect();
    let mut residual = Vec::new();

    for section in sections.iter_mut() {
        let Some(issue) = by_id.get(section.section_id.as_str()) else { continue };
        let category = classify(&section.path);
        let fill = autofill_text(category);
        if fill.is_empty() {
            residual.push((*issue).clone());
        } else {
            section.content = fill.to_string();
        }
    }

    (sections, residual)
}

/// Reusable safety net: strip any leftover placeholder markers from text
/// that is about to be emitted, without regard to section classification.
pub fn strip_placeholder_text(text: &str) -> String {
    let text = BRACKETED_INSTRUCTION_RE.replace_all(text, "");
    let text = PARENTHESIZED_DIRECTIVE_RE.replace_all(&text, "");
    TEMPLATE_VAR_RE.replace_all(&text, "").trim().to_string()
}
