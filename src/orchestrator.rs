//! Generation orchestrator (C14): the end-to-end pipeline from a format
//! definition to a validated, completeness-checked `aiResult`.

use std::collections::{HashMap, HashSet};

use crate::cancellation::{sleep_cancellable, CancellationToken};
use crate::completeness;
use crate::core::Core;
use crate::error::CoreError;
use crate::policy::{PHASE_CLEANUP_CORRECTION, PHASE_GENERATE_SECTION};
use crate::prompt::{build_section_prompt, render};
use crate::redact::redact_secrets;
use crate::section_index::compile_section_index;
use crate::types::{GeneratedSection, LlmRequest, Outcome, ResultStatus, SectionDescriptor, SelectionMode, TraceEvent};
use crate::validator::validate;

/// Caller-supplied knobs for one `generate` run.
pub struct GenerationOptions {
    pub tenant_id: String,
    pub preferred_provider: Option<String>,
    pub candidate_providers: Vec<String>,
    pub selection_mode: SelectionMode,
    pub enable_cleanup: bool,
    pub resume_sections: Option<Vec<GeneratedSection>>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            tenant_id: "default".to_string(),
            preferred_provider: None,
            candidate_providers: Vec::new(),
            selection_mode: SelectionMode::Auto,
            enable_cleanup: false,
            resume_sections: None,
        }
    }
}

/// A project's inputs to one generation run.
pub struct Project {
    pub title: String,
    pub variables: HashMap<String, String>,
    pub format_definition: serde_json::Value,
    pub base_prompt_template: String,
}

pub struct GenerationResult {
    pub sections: Vec<GeneratedSection>,
    pub warnings: Vec<String>,
    pub incidents: Vec<crate::types::Incident>,
    pub outcome: Outcome,
    pub trace: Vec<TraceEvent>,
}

fn event(trace: &mut Vec<TraceEvent>, step: &str, status: &str, title: &str, detail: Option<String>) {
    trace.push(TraceEvent {
        step: step.to_string(),
        status: status.to_string(),
        title: title.to_string(),
        detail: detail.map(|d| redact_secrets(&d, &[])),
        meta: None,
        preview: None,
    });
}

/// Run the full pipeline described in the component design: compile, render,
/// resume, generate section-by-section, optionally clean up, then validate
/// and fill placeholders.
pub async fn generate(
    core: &Core,
    project: &Project,
    options: GenerationOptions,
    cancel: &CancellationToken,
) -> Result<GenerationResult, CoreError> {
    let mut trace = Vec::new();
    let mut incidents = Vec::new();
    let mut disabled_for_job: HashSet<String> = HashSet::new();

    event(&mut trace, "ai.generate.start", "running", "generation started", None);

    // 2. Provider selection is carried entirely via `options` (runtime
    // override) today; persisted-selection resolution is left to the
    // caller, which already owns the persistence format (§6).

    // 3. Render the base prompt.
    let mut missing_vars = Vec::new();
    let mut missing_hook = |names: &[String]| missing_vars.extend_from_slice(names);
    let rendered_base = render(&project.base_prompt_template, &project.variables, Some(&mut missing_hook));
    let base_prompt = if rendered_base.trim().is_empty() {
        format!("Generate the body content for the document titled \"{}\".", project.title)
    } else {
        rendered_base
    };
    event(&mut trace, "prompt.render", "done", "base prompt rendered", None);

    // 4. Compile the section index, falling back to one generic section.
    let mut sections_index = compile_section_index(&project.format_definition);
    if sections_index.is_empty() {
        sections_index.push(SectionDescriptor {
            section_id: "sec-0001".to_string(),
            path: project.title.clone(),
            level: 1,
            kind: "heading".to_string(),
        });
    }
    event(
        &mut trace,
        "format.section_index",
        "done",
        "section index compiled",
        Some(format!("{} sections", sections_index.len())),
    );

    // 5. Resume: accept a leading contiguous prefix matched against the
    // freshly compiled index by sectionId (falling back to path).
    let mut generated: Vec<GeneratedSection> = Vec::new();
    let mut remaining = &sections_index[..];
    if let Some(resume) = &options.resume_sections {
        let matched = match_resume_prefix(resume, &sections_index);
        generated = resume[..matched].to_vec();
        remaining = &sections_index[matched..];
    }

    // 6. Generate each remaining section in order.
    for (index, descriptor) in remaining.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        if index > 0 || !generated.is_empty() {
            if sleep_cancellable(core.config.inter_section_delay, cancel).await {
                return Err(CoreError::Cancelled);
            }
        }

        event(
            &mut trace,
            "ai.generate.section",
            "running",
            &descriptor.path,
            Some(descriptor.section_id.clone()),
        );

        let prompt = build_section_prompt(&base_prompt, &descriptor.path, &descriptor.section_id, None, &project.variables);
        let request = LlmRequest {
            phase: PHASE_GENERATE_SECTION.to_string(),
            prompt,
            context: String::new(),
            section_id: Some(descriptor.section_id.clone()),
            section_path: Some(descriptor.path.clone()),
            tenant_id: options.tenant_id.clone(),
            preferred_provider: options.preferred_provider.clone(),
            candidate_providers: options.candidate_providers.clone(),
            selection_mode: options.selection_mode,
            metadata: HashMap::new(),
        };

        match core.router.call_llm_with_resilience(&request, &mut disabled_for_job, cancel).await {
            Ok(result) => {
                incidents.extend(result.incidents.clone());
                generated.push(GeneratedSection {
                    section_id: descriptor.section_id.clone(),
                    path: descriptor.path.clone(),
                    content: result.content,
                });
                event(&mut trace, "ai.generate.section", "done", &descriptor.path, None);
            }
            Err(err) => {
                event(&mut trace, "ai.generate.section", "warn", &descriptor.path, Some(err.to_string()));
                return Err(err);
            }
        }
    }

    // 7. Optional cleanup phase.
    if options.enable_cleanup {
        generated = run_cleanup_phase(core, &options, &generated, &mut incidents, &mut trace, cancel).await?;
    }

    // 8. Completeness pass.
    let issues = completeness::detect_placeholders(&generated);
    let (filled, residual) = completeness::autofill(generated, &issues);
    event(
        &mut trace,
        "ai.completeness",
        "done",
        "completeness pass finished",
        Some(format!("{} issues, {} residual", issues.len(), residual.len())),
    );

    // 9. Validate and return.
    let validated = validate(filled)?;
    let mut warnings: Vec<String> = validated.warnings.iter().map(|w| format!("{}: {}", w.section_id, w.message)).collect();
    warnings.extend(residual.iter().map(|issue| format!("{}: unresolved placeholder ({:?})", issue.section_id, issue.kind)));

    let outcome = if !incidents.is_empty() || !warnings.is_empty() { Outcome::CompletedWithIncidents } else { Outcome::Completed };
    event(&mut trace, "ai.validation", "done", "validation finished", None);
    event(&mut trace, "ai.generate.done", "done", "generation finished", None);

    Ok(GenerationResult { sections: validated.sections, warnings, incidents, outcome, trace })
}

/// Match the leading contiguous prefix of `resume` against `index` by
/// `sectionId` (falling back to `path`); any gap discards everything from
/// that point on.
fn match_resume_prefix(resume: &[GeneratedSection], index: &[SectionDescriptor]) -> usize {
    let mut matched = 0;
    for (resumed, descriptor) in resume.iter().zip(index.iter()) {
        let matches = resumed.section_id == descriptor.section_id || resumed.path == descriptor.path;
        if !matches {
            break;
        }
        matched += 1;
    }
    matched
}

async fn run_cleanup_phase(
    core: &Core,
    options: &GenerationOptions,
    sections: &[GeneratedSection],
    incidents: &mut Vec<crate::types::Incident>,
    trace: &mut Vec<TraceEvent>,
    cancel: &CancellationToken,
) -> Result<Vec<GeneratedSection>, CoreError> {
    let context = serde_json::to_string(&sections).unwrap_or_default();
    let request = LlmRequest {
        phase: PHASE_CLEANUP_CORRECTION.to_string(),
        prompt: "Review the following sections as JSON and correct any formatting issues, returning the same JSON shape.".to_string(),
        context,
        section_id: None,
        section_path: None,
        tenant_id: options.tenant_id.clone(),
        preferred_provider: None,
        candidate_providers: Vec::new(),
        selection_mode: SelectionMode::Auto,
        metadata: HashMap::new(),
    };

    let mut disabled = HashSet::new();
    let result = core.router.call_llm_with_resilience(&request, &mut disabled, cancel).await?;
    incidents.extend(result.incidents.clone());

    if result.status == ResultStatus::Degraded {
        event(trace, "ai.correction", "warn", "cleanup degraded, keeping original sections", None);
        return Ok(sections.to_vec());
    }

    match parse_cleanup_response(&result.content) {
        Some(corrected) => {
            event(trace, "ai.correction", "done", "cleanup applied", None);
            Ok(merge_corrected_sections(sections, corrected))
        }
        None => {
            event(trace, "ai.correction", "warn", "cleanup response unparsable, keeping original sections", None);
            Ok(sections.to_vec())
        }
    }
}

/// Parse a cleanup response that may be wrapped in code fences or trailing
/// prose: strip fences, then fall back to the substring between the first
/// `{` and the last `}`.
fn parse_cleanup_response(content: &str) -> Option<Vec<GeneratedSection>> {
    let stripped = content.replace("```json", "").replace("```", "");
    if let Ok(sections) = serde_json::from_str::<Vec<GeneratedSection>>(stripped.trim()) {
        return Some(sections);
    }
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end < start {
        return None;
    }
    let candidate = &stripped[start..=end];
    serde_json::from_str::<CleanupPayload>(candidate).ok().map(|payload| payload.sections)
}

#[derive(serde::Deserialize)]
struct CleanupPayload {
    sections: Vec<GeneratedSection>,
}

/// Merge corrected content into `original` by `sectionId`, never by
/// position: entries missing from `corrected` keep their original content,
/// and a non-string/empty corrected content is rejected in favor of the
/// original.
fn merge_corrected_sections(original: &[GeneratedSection], corrected: Vec<GeneratedSection>) -> Vec<GeneratedSection> {
    let by_id: HashMap<String, GeneratedSection> = corrected.into_iter().map(|s| (s.section_id.clone(), s)).collect();
    original
        .iter()
        .map(|section| match by_id.get(&section.section_id) {
            Some(updated) if !updated.content.trim().is_empty() => GeneratedSection {
                section_id: section.section_id.clone(),
                path: section.path.clone(),
                content: updated.content.clone(),
            },
            _ => section.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::provider::scripted::{Scripted, ScriptedProvider};
    use crate::provider::ProviderClient;
    use serde_json::json;
    use std::sync::Arc;

    fn core_with(providers: Vec<(&str, Arc<dyn ProviderClient>)>, mut config: Config) -> Core {
        config.fallback_chain_generate = providers.iter().map(|(id, _)| id.to_string()).collect();
        // Keep the inter-section delay negligible so these tests run fast;
        // production callers get the spec default from `Config::default()`.
        config.inter_section_delay = std::time::Duration::from_millis(1);
        let mut map = HashMap::new();
        for (id, provider) in providers {
            map.insert(id.to_string(), provider);
        }
        Core::new(config, map)
    }

    fn project_with_two_sections() -> Project {
        Project {
            title: "My Project".to_string(),
            variables: HashMap::from([("title".to_string(), "My Project".to_string())]),
            format_definition: json!({
                "body": {"chapters": [{"title": "Chapter 1"}, {"title": "Chapter 2"}]}
            }),
            base_prompt_template: "Document about {{title}}.".to_string(),
        }
    }

    #[tokio::test]
    async fn happy_path_generates_all_sections_in_order() {
        let primary =
            Arc::new(ScriptedProvider::new("primary", vec![Scripted::Ok("First.".into()), Scripted::Ok("Second.".into())]));
        let core = core_with(vec![("primary", primary.clone())], Config::default());
        let cancel = CancellationToken::new();
        let result = generate(&core, &project_with_two_sections(), GenerationOptions::default(), &cancel).await.unwrap();
        assert_eq!(result.sections.len(), 2);
        assert_eq!(result.sections[0].path, "Chapter 1");
        assert_eq!(result.sections[1].path, "Chapter 2");
        assert_eq!(result.outcome, Outcome::Completed);
    }

    #[tokio::test]
    async fn resume_seeds_matched_prefix_and_generates_the_rest() {
        let primary = Arc::new(ScriptedProvider::new("primary", vec![Scripted::Ok("Second.".into())]));
        let core = core_with(vec![("primary", primary.clone())], Config::default());
        let cancel = CancellationToken::new();
        let mut options = GenerationOptions::default();
        options.resume_sections =
            Some(vec![GeneratedSection { section_id: "sec-0001".to_string(), path: "Chapter 1".to_string(), content: "First.".to_string() }]);
        let result = generate(&core, &project_with_two_sections(), options, &cancel).await.unwrap();
        assert_eq!(result.sections.len(), 2);
        assert_eq!(primary.call_count(), 1);
    }

    #[tokio::test]
    async fn cancellation_before_any_section_raises_cancelled() {
        let primary = Arc::new(ScriptedProvider::new("primary", vec![]));
        let core = core_with(vec![("primary", primary)], Config::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = generate(&core, &project_with_two_sections(), GenerationOptions::default(), &cancel).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn falls_back_to_single_generic_section_when_index_is_empty() {
        let primary = Arc::new(ScriptedProvider::new("primary", vec![Scripted::Ok("Generic.".into())]));
        let core = core_with(vec![("primary", primary)], Config::default());
        let mut project = project_with_two_sections();
        project.format_definition = json!({});
        let cancel = CancellationToken::new();
        let result = generate(&core, &project, GenerationOptions::default(), &cancel).await.unwrap();
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].path, "My Project");
    }

    #[test]
    fn parses_cleanup_response_wrapped_in_code_fences() {
        let content = "```json\n{\"sections\": [{\"section_id\": \"sec-0001\", \"path\": \"Chapter 1\", \"content\": \"Fixed.\"}]}\n```";
        let parsed = parse_cleanup_response(content).unwrap();
        assert_eq!(parsed[0].content, "Fixed.");
    }

    #[test]
    fn merge_keeps_original_when_not_present_in_corrected() {
        let original = vec![
            GeneratedSection { section_id: "sec-0001".to_string(), path: "Chapter 1".to_string(), content: "Original.".to_string() },
            GeneratedSection { section_id: "sec-0002".to_string(), path: "Chapter 2".to_string(), content: "Second.".to_string() },
        ];
        let corrected =
            vec![GeneratedSection { section_id: "sec-0001".to_string(), path: "Chapter 1".to_string(), content: "Fixed.".to_string() }];
        let merged = merge_corrected_sections(&original, corrected);
        assert_eq!(merged[0].content, "Fixed.");
        assert_eq!(merged[1].content, "Second.");
    }

    #[test]
    fn match_resume_prefix_stops_at_first_gap() {
        let index = vec![
            SectionDescriptor { section_id: "sec-0001".to_string(), path: "Chapter 1".to_string(), level: 1, kind: "heading".to_string() },
            SectionDescriptor { section_id: "sec-0002".to_string(), path: "Chapter 2".to_string(), level: 1, kind: "heading".to_string() },
        ];
        let resume =
            vec![GeneratedSection { section_id: "sec-9999".to_string(), path: "Mismatched".to_string(), content: "x".to_string() }];
        assert_eq!(match_resume_prefix(&resume, &index), 0);
    }
}
