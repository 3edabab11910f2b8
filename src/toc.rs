//! Canonical table-of-contents / index title recognition, shared by the
//! section index compiler (C10), the output validator (C12), and the
//! router's degraded-mode local sanitizer (C9).
//!
//! A single normalization function and a single title set, rather than the
//! slightly different copies this logic historically accumulates per call
//! site.

use std::collections::HashSet;
use once_cell::sync::Lazy;

static TOC_TITLES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "indice",
        "indice de contenido",
        "indice de contenidos",
        "indice de tablas",
        "indice de figuras",
        "indice de abreviaturas",
        "tabla de contenido",
        "tabla de contenidos",
        "table of contents",
        "toc",
    ]
    .into_iter()
    .collect()
});

/// Structural keys whose subtrees are never traversed for generative
/// section emission, regardless of whether they otherwise look like
/// structural containers.
pub const EXCLUDED_CONTAINER_KEYS: &[&str] = &["indices", "index", "table_of_contents", "toc"];

/// NFKD-accent-strip, lowercase, whitespace-collapse a title for
/// comparison. Matching against [`is_toc_title`] is always exact-equality
/// on the normalized form, never substring matching.
pub fn normalize_title(title: &str) -> String {
    let decomposed: String = unicode_strip_accents(title);
    let lowered = decomposed.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim().to_string()
}

/// Strip combining diacritical marks by decomposing known accented Latin
/// letters used in Spanish titles. This avoids pulling in a full Unicode
/// normalization crate for a narrow, known alphabet.
fn unicode_strip_accents(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'Á' | 'À' | 'Ä' | 'Â' => 'A',
            'É' | 'È' | 'Ë' | 'Ê' => 'E',
            'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
            'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
            'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
            'ñ' => 'n',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}

/// True when `title`'s normalized form is a recognized TOC/index title.
/// Exact match only; never partial/substring matching.
pub fn is_toc_title(title: &str) -> bool {
    TOC_TITLES.contains(normalize_title(title).as_str())
}

/// True when any `/`-separated segment of `path` is a TOC title.
pub fn is_toc_path(path: &str) -> bool {
    path.split('/').any(is_toc_title)
}

/// True when `key` (a structural key encountered during traversal) must
/// never be descended into for generative section emission.
pub fn is_excluded_container_key(key: &str) -> bool {
    EXCLUDED_CONTAINER_KEYS.contains(&key)
}
