//! Output validator (C12): structural validation and content sanitization
//! applied to a generated `aiResult` before it is handed back to callers.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::prompt::SKIP_SECTION_SENTINEL;
use crate::toc::is_toc_path;
use crate::types::GeneratedSection;

const FORBIDDEN_PHRASES: &[&str] =
    &["figura de ejemplo", "tabla de ejemplo", "titulo del proyecto", "lorem ipsum", "[pendiente]"];

static BOLD_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|__").unwrap());
static HEADING_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s*").unwrap());
static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[^\n]*\n?").unwrap());
static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\s*)([-*+]|\d+[.)])\s+").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static LEADER_DOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\.{3,}|[ \t]{4,})\s*(pag\.?\s*)?(\d+|X)\s*$").unwrap());
static TRAILING_PAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+pag\.?\s+(\d+|X)\s*$").unwrap());
static ABBREVIATION_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([A-Za-z0-9.]{2,10})\s*[:\-–—]\s*(.+)$").unwrap());

const MIN_CONTENT_LENGTH: usize = 20;

/// A warning recorded while validating one `aiResult`, not a rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub section_id: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedResult {
    pub sections: Vec<GeneratedSection>,
    pub warnings: Vec<ValidationWarning>,
}

/// Validate and sanitize a raw section list. Input must be non-empty;
/// returns `Err` otherwise.
pub fn validate(sections: Vec<GeneratedSection>) -> Result<ValidatedResult, crate::error::CoreError> {
    if sections.is_empty() {
        return Err(crate::error::CoreError::Validation("aiResult must contain a non-empty sections list".to_string()));
    }

    let mut out = Vec::with_capacity(sections.len());
    let mut warnings = Vec::new();
    let mut seen_ids: HashMap<String, u32> = HashMap::new();
    let mut auto_counter = 0u32;

    for (index, section) in sections.into_iter().enumerate() {
        if is_toc_path(&section.path) {
            continue;
        }

        let mut section_id = section.section_id.clone();
        if section_id.trim().is_empty() {
            auto_counter += 1;
            section_id = format!("sec-auto-{:04}", auto_counter);
        }
        section_id = dedup_section_id(section_id, &mut seen_ids);

        if section.path.trim().is_empty() {
            warnings.push(ValidationWarning { section_id: section_id.clone(), message: format!("Section '{section_id}' missing path") });
        }

        let content = sanitize_content(&section.content, &section.path);

        if content.trim().is_empty() {
            warnings.push(ValidationWarning { section_id: section_id.clone(), message: "empty content".to_string() });
        } else if content.trim().len() < MIN_CONTENT_LENGTH {
            warnings.push(ValidationWarning {
                section_id: section_id.clone(),
                message: format!("content shorter than {MIN_CONTENT_LENGTH} characters"),
            });
        }

        out.push(GeneratedSection { section_id, path: section.path, content });
        let _ = index;
    }

    Ok(ValidatedResult { sections: out, warnings })
}

fn dedup_section_id(id: String, seen: &mut HashMap<String, u32>) -> String {
    match seen.get_mut(&id) {
        None => {
            seen.insert(id.clone(), 0);
            id
        }
        Some(count) => {
            *count += 1;
            format!("{id}-dup-{count}")
        }
    }
}

/// True when `path` is recognized as an abbreviations/acronyms listing
/// section, based on keywords in its final path segment.
fn is_abbreviations_path(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    last.contains("abreviatura") || last.contains("abbreviation") || last.contains("acronym") || last.contains("sigla")
}

/// Sanitize one section's raw content per the documented pipeline.
pub fn sanitize_content(content: &str, path: &str) -> String {
    if content.trim() == SKIP_SECTION_SENTINEL {
        return String::new();
    }
    if is_toc_path(path) {
        return String::new();
    }

    let mut text = CODE_FENCE_RE.replace_all(content, "").into_owned();
    text = HEADING_MARKER_RE.replace_all(&text, "").into_owned();
    text = BOLD_MARKER_RE.replace_all(&text, "").into_owned();
    text = text.replace('|', "");

    let abbreviations = is_abbreviations_path(path);
    let mut seen_siglas = HashSet::new();
    let mut lines = Vec::new();

    for raw_line in text.lines() {
        let mut line = BULLET_RE.replace(raw_line, "").into_owned();
        line = WHITESPACE_RE.replace_all(&line, " ").trim().to_string();

        if line.is_empty() {
            lines.push(line);
            continue;
        }
        let lowered = line.to_lowercase();
        if FORBIDDEN_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            continue;
        }

        line = LEADER_DOT_RE.replace(&line, "").trim_end().to_string();
        line = TRAILING_PAGE_RE.replace(&line, "").trim_end().to_string();

        if abbreviations {
            if let Some(caps) = ABBREVIATION_LINE_RE.captures(&line) {
                let sigla = caps[1].trim().to_uppercase();
                let meaning = caps[2].trim().to_string();
                if !seen_siglas.insert(sigla.clone()) {
                    continue;
                }
                line = format!("{sigla}\t{meaning}");
            }
        }

        lines.push(line);
    }

    collapse_blank_lines(&lines)
}

fn collapse_blank_lines(lines: &[String]) -> String {
    let mut out = Vec::new();
    let mut prev_blank = false;
    for line in lines {
        let blank = line.is_empty();
        if blank && prev_blank {
            continue;
        }
        out.push(line.clone());
        prev_blank = blank;
    }
    while out.first().is_some_and(|l| l.is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}
