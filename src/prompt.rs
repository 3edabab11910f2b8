//! Prompt renderer (C11): `{{var}}` substitution and section-prompt
//! assembly.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());

pub const SKIP_SECTION_SENTINEL: &str = "<<SKIP_SECTION>>";

/// The canonical system block enforcing plain-text, no-markdown, no-TOC,
/// no-placeholder generation, with `{section_path}`/`{section_id}` left as
/// literal markers for the second substitution pass.
const SYSTEM_PROMPT_TEMPLATE: &str = "\
You are generating the body text of one section of a formal document.

Section: {section_path} (id: {section_id})

Rules:
- Write plain text only. No markdown, no headings, no bullet lists, no tables.
- Do not restate the section title; begin directly with the content.
- Do not insert page breaks or a manual table of contents.
- Do not use placeholder phrases such as \"[TODO]\", \"(fill in)\", or similar instructions to the writer.
- Write between 180 and 250 words unless the section is inherently short.
- If this section's path begins with an index heading, respond with exactly <<SKIP_SECTION>> and nothing else.

Document context:
Title: {{title}}
Topic: {{tema}}
General objective: {{objetivo_general}}
Audience: {{poblacion}}
Independent variable: {{variable_independiente}}
";

/// Render `{{var}}` placeholders against `values`. Missing variables are
/// kept literally; `trace_hook`, if given, is invoked once with the list
/// of variable names that were missing.
pub fn render(template: &str, values: &HashMap<String, String>, mut trace_hook: Option<&mut dyn FnMut(&[String])>) -> String {
    let mut missing = Vec::new();
    let rendered = PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match values.get(name) {
                Some(value) => value.clone(),
                None => {
                    missing.push(name.to_string());
                    caps[0].to_string()
                }
            }
        })
        .into_owned();
    if let Some(hook) = trace_hook.as_deref_mut() {
        if !missing.is_empty() {
            hook(&missing);
        }
    }
    rendered
}

/// Build the final prompt for one section.
pub fn build_section_prompt(
    base_prompt: &str,
    section_path: &str,
    section_id: &str,
    extra_context: Option<&str>,
    values: &HashMap<String, String>,
) -> String {
    let system_rendered = render(SYSTEM_PROMPT_TEMPLATE, values, None);
    let system_block = system_rendered.replace("{section_path}", section_path).replace("{section_id}", section_id);

    let mut parts = vec![system_block];
    if !base_prompt.trim().is_empty() {
        parts.push(format!("PROJECT ADDITIONAL CONTEXT\n{base_prompt}"));
    }
    if let Some(extra) = extra_context {
        if !extra.trim().is_empty() {
            parts.push(extra.to_string());
        }
    }
    parts.join("\n\n")
}
