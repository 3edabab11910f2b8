//! Phase policy registry (C8): per-phase fallback chains, token budgets,
//! and the degraded-mode flag.

use std::collections::HashMap;

pub const PHASE_GENERATE_SECTION: &str = "generate_section";
pub const PHASE_CLEANUP_CORRECTION: &str = "cleanup_correction";

#[derive(Debug, Clone)]
pub struct PhasePolicy {
    pub critical: bool,
    pub allow_degraded: bool,
    pub fallback_chain: Vec<String>,
    pub max_input_tokens: u32,
    pub max_output_tokens: u32,
}

impl PhasePolicy {
    fn new(
        critical: bool,
        allow_degraded: bool,
        fallback_chain: Vec<String>,
        max_input_tokens: u32,
        max_output_tokens: u32,
    ) -> Self {
        assert!(!(critical && allow_degraded), "critical phases must never allow degraded mode");
        Self { critical, allow_degraded, fallback_chain, max_input_tokens, max_output_tokens }
    }
}

/// Maps phase name to its policy. Built once from [`crate::config::Config`]
/// at [`crate::core::Core`] construction time.
pub struct PhasePolicyRegistry {
    policies: HashMap<String, PhasePolicy>,
}

impl PhasePolicyRegistry {
    pub fn from_config(config: &crate::config::Config) -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            PHASE_GENERATE_SECTION.to_string(),
            PhasePolicy::new(
                true,
                false,
                config.fallback_chain_generate.clone(),
                config.max_input_tokens_generate,
                config.max_output_tokens_generate,
            ),
        );
        policies.insert(
            PHASE_CLEANUP_CORRECTION.to_string(),
            PhasePolicy::new(
                false,
                true,
                ensure_degraded_suffix(config.fallback_chain_cleanup.clone()),
                config.max_input_tokens_cleanup,
                config.max_output_tokens_cleanup,
            ),
        );
        Self { policies }
    }

    pub fn get(&self, phase: &str) -> Option<&PhasePolicy> {
        self.policies.get(phase)
    }
}

fn ensure_degraded_suffix(mut chain: Vec<String>) -> Vec<String> {
    if !chain.iter().any(|p| p == "degraded") {
        chain.push("degraded".to_string());
    }
    chain
}
