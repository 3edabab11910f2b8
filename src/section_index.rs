//! Section index compiler (C10): flattens a nested format definition into
//! an ordered list of section descriptors, excluding TOC/index and
//! guidance nodes.

use serde_json::Value;

use crate::toc::{is_excluded_container_key, is_toc_title};
use crate::types::SectionDescriptor;

const STRUCTURAL_KEYS: &[&str] = &[
    "preliminaries", "body", "finals", "chapters", "items", "sections", "subsections", "list", "annexes", "indices",
];

const TITLE_KEYS: &[&str] = &["title", "heading", "text"];

const GUIDANCE_KEYS: &[&str] = &[
    "note",
    "chapter_note",
    "instruction",
    "detailed_instruction",
    "guide",
    "example",
    "comment",
    "placeholder",
    "view_type",
    "preview",
    "_meta",
    "version",
    "description",
];

const MAX_LEVEL: u8 = 6;

/// Compile `definition` into a flat, ordered section index. Always returns
/// at least the sections that survive exclusion; callers wanting the
/// "single generic section" fallback of the orchestrator (§4.14 step 4)
/// apply it themselves when this returns empty.
pub fn compile_section_index(definition: &Value) -> Vec<SectionDescriptor> {
    let mut out = Vec::new();
    let mut counter = 0u32;
    walk(definition, "", 1, &mut out, &mut counter);
    out
}

fn walk(node: &Value, parent_path: &str, level: u8, out: &mut Vec<SectionDescriptor>, counter: &mut u32) {
    match node {
        Value::Object(map) => {
            let own_title = TITLE_KEYS.iter().find_map(|key| map.get(*key)).and_then(Value::as_str).map(str::trim);

            let current_path = match own_title {
                Some(title) if !title.is_empty() && !is_toc_title(title) => {
                    *counter += 1;
                    let path = if parent_path.is_empty() { title.to_string() } else { format!("{parent_path}/{title}") };
                    out.push(SectionDescriptor {
                        section_id: format!("sec-{:04}", counter),
                        path: path.clone(),
                        level: level.min(MAX_LEVEL),
                        kind: "heading".to_string(),
                    });
                    path
                }
                Some(title) if is_toc_title(title) => return,
                _ => parent_path.to_string(),
            };

            for (key, value) in map {
                if is_excluded_container_key(key) || GUIDANCE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                if TITLE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                if STRUCTURAL_KEYS.contains(&key.as_str()) {
                    walk(value, &current_path, level + 1, out, counter);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, parent_path, level, out, counter);
            }
        }
        _ => {}
    }
}
