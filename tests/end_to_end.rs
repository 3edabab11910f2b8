//! End-to-end scenarios driving the orchestrator against scripted
//! providers, with no network access required.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use docgen_llm_core::cancellation::CancellationToken;
use docgen_llm_core::config::Config;
use docgen_llm_core::error::{CoreError, QuotaErrorType};
use docgen_llm_core::orchestrator::{generate, GenerationOptions, Project};
use docgen_llm_core::provider::scripted::{Scripted, ScriptedProvider};
use docgen_llm_core::provider::ProviderClient;
use docgen_llm_core::types::{GeneratedSection, Outcome, SelectionMode};
use docgen_llm_core::Core;
use serde_json::json;

fn fast_config() -> Config {
    let mut config = Config::default();
    config.inter_section_delay = Duration::from_millis(1);
    config
}

fn two_section_project() -> Project {
    Project {
        title: "Thesis".to_string(),
        variables: HashMap::from([("title".to_string(), "Thesis".to_string())]),
        format_definition: json!({
            "body": {"chapters": [{"title": "Chapter 1"}, {"title": "Chapter 2"}]}
        }),
        base_prompt_template: "About {{title}}.".to_string(),
    }
}

fn core_with(providers: Vec<(&str, Arc<dyn ProviderClient>)>, mut config: Config) -> Core {
    config.fallback_chain_generate = providers.iter().map(|(id, _)| id.to_string()).collect();
    let mut map = HashMap::new();
    for (id, provider) in providers {
        map.insert(id.to_string(), provider);
    }
    Core::new(config, map)
}

#[tokio::test]
async fn scenario_1_happy_path_two_sections() {
    let primary = Arc::new(ScriptedProvider::new("primary", vec![Scripted::Ok("Content 1".into()), Scripted::Ok("Content 2".into())]));
    let core = core_with(vec![("primary", primary.clone())], fast_config());
    let cancel = CancellationToken::new();

    let result = generate(&core, &two_section_project(), GenerationOptions::default(), &cancel).await.unwrap();

    assert_eq!(result.sections.len(), 2);
    assert_eq!(result.sections[0].content, "Content 1");
    assert_eq!(result.sections[1].content, "Content 2");
    assert!(result.incidents.is_empty());
    assert_eq!(result.outcome, Outcome::Completed);
    assert_eq!(primary.call_count(), 2);
}

#[tokio::test]
async fn scenario_2_quota_fallback() {
    let primary = Arc::new(ScriptedProvider::new(
        "primary",
        vec![Scripted::Err(CoreError::QuotaExhausted {
            provider: "primary".to_string(),
            message: "quota exceeded".to_string(),
            error_type: QuotaErrorType::Exhausted,
            retry_after: None,
        })],
    ));
    let fallback = Arc::new(ScriptedProvider::new("fallback", vec![Scripted::Ok("Fallback content.".into())]));
    let core = core_with(vec![("primary", primary.clone()), ("fallback", fallback.clone())], fast_config());
    let cancel = CancellationToken::new();

    let mut project = two_section_project();
    project.format_definition = json!({"body": {"chapters": [{"title": "Chapter 1"}]}});

    let result = generate(&core, &project, GenerationOptions::default(), &cancel).await.unwrap();

    assert_eq!(result.sections.len(), 1);
    assert_eq!(result.sections[0].content, "Fallback content.");
    assert_eq!(primary.call_count(), 1);
    assert_eq!(fallback.call_count(), 1);
    assert_eq!(result.incidents.iter().filter(|i| format!("{:?}", i.kind) == "Provider").count(), 1);
}

#[tokio::test]
async fn scenario_3_exhausted_for_job_skip_across_sections() {
    let primary = Arc::new(ScriptedProvider::new(
        "primary",
        vec![Scripted::Err(CoreError::QuotaExhausted {
            provider: "primary".to_string(),
            message: "quota exceeded".to_string(),
            error_type: QuotaErrorType::Exhausted,
            retry_after: None,
        })],
    ));
    let fallback =
        Arc::new(ScriptedProvider::new("fallback", vec![Scripted::Ok("Fallback 1.".into()), Scripted::Ok("Fallback 2.".into())]));
    let core = core_with(vec![("primary", primary.clone()), ("fallback", fallback.clone())], fast_config());
    let cancel = CancellationToken::new();

    let result = generate(&core, &two_section_project(), GenerationOptions::default(), &cancel).await.unwrap();

    assert_eq!(result.sections.len(), 2);
    assert_eq!(result.sections[0].content, "Fallback 1.");
    assert_eq!(result.sections[1].content, "Fallback 2.");
    assert_eq!(primary.call_count(), 1, "primary must be disabled for the rest of the job after EXHAUSTED");
    assert_eq!(fallback.call_count(), 2);
}

#[tokio::test]
async fn scenario_4_fixed_mode_tls_error_no_fallback() {
    let mut config = fast_config();
    config.retry.max_transient_retries = 1;
    let primary = Arc::new(ScriptedProvider::new(
        "primary",
        vec![
            Scripted::Err(CoreError::Transient { provider: "primary".to_string(), message: "SSLV3_ALERT_BAD_RECORD_MAC".to_string(), retry_after: None }),
            Scripted::Err(CoreError::Transient { provider: "primary".to_string(), message: "SSLV3_ALERT_BAD_RECORD_MAC".to_string(), retry_after: None }),
        ],
    ));
    let core = core_with(vec![("primary", primary.clone())], config);
    let cancel = CancellationToken::new();

    let mut project = two_section_project();
    project.format_definition = json!({"body": {"chapters": [{"title": "Chapter 1"}]}});
    let mut options = GenerationOptions::default();
    options.selection_mode = SelectionMode::Fixed;
    options.candidate_providers = vec!["primary".to_string()];

    let result = generate(&core, &project, options, &cancel).await;

    assert!(result.is_err());
    assert_eq!(primary.call_count(), 2, "one attempt plus one retry, then terminal");
}

#[tokio::test]
async fn scenario_5_resume_from_seed_override() {
    let primary = Arc::new(ScriptedProvider::new("primary", vec![Scripted::Ok("new".into())]));
    let core = core_with(vec![("primary", primary.clone())], fast_config());
    let cancel = CancellationToken::new();

    let mut options = GenerationOptions::default();
    options.resume_sections = Some(vec![GeneratedSection { section_id: "sec-0001".to_string(), path: "Chapter 1".to_string(), content: "prev".to_string() }]);

    let result = generate(&core, &two_section_project(), options, &cancel).await.unwrap();

    assert_eq!(result.sections.len(), 2);
    assert_eq!(result.sections[0].content, "prev");
    assert_eq!(result.sections[1].content, "new");
    assert_eq!(primary.call_count(), 1);
}

#[tokio::test]
async fn scenario_6_cleanup_degrades_generation_still_succeeds() {
    let primary = Arc::new(ScriptedProvider::new("primary", vec![Scripted::Ok("Generated content.".into())]));
    let cleanup = Arc::new(ScriptedProvider::new(
        "cleanup-provider",
        vec![
            Scripted::Err(CoreError::Transient { provider: "cleanup-provider".to_string(), message: "timeout".to_string(), retry_after: None }),
        ],
    ));
    let mut config = fast_config();
    config.retry.max_transient_retries = 0;
    config.fallback_chain_cleanup = vec!["cleanup-provider".to_string(), "degraded".to_string()];

    let core = core_with(vec![("primary", primary.clone()), ("cleanup-provider", cleanup.clone())], config);
    let cancel = CancellationToken::new();

    let mut project = two_section_project();
    project.format_definition = json!({"body": {"chapters": [{"title": "Chapter 1"}]}});
    let mut options = GenerationOptions::default();
    options.enable_cleanup = true;

    let result = generate(&core, &project, options, &cancel).await.unwrap();

    assert_eq!(result.sections.len(), 1);
    assert_eq!(result.sections[0].content, "Generated content.");
    assert_eq!(result.outcome, Outcome::CompletedWithIncidents);
    assert!(result.incidents.iter().any(|i| format!("{:?}", i.kind) == "Degraded"));
}
