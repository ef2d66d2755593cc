//! Builders for test configurations and step outputs.

#![allow(dead_code)]

use contentflow::confidence::ScoreResolver;
use contentflow::config::Config;
use contentflow::handler::ScoredOutput;
use serde_json::{json, Value};

/// Builder for `Config` instances with test-friendly queue timings.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Default steps, immediate redelivery and no idle sleeps.
    pub fn new() -> Self {
        let mut config = Config::default();
        config.queue.poll_interval_secs = 0;
        config.queue.process_timeout_secs = 0;
        config.queue.visibility_timeout_secs = 0;
        config.supervisor.poll_interval_ms = 10;
        Self { config }
    }

    pub fn steps(mut self, steps: &[&str]) -> Self {
        self.config.process_steps = steps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn dead_letter_threshold(mut self, threshold: u32) -> Self {
        self.config.queue.dead_letter_threshold = threshold;
        self
    }

    /// Lease taken on receive. Zero makes failed messages immediately visible.
    pub fn process_timeout_secs(mut self, secs: u64) -> Self {
        self.config.queue.process_timeout_secs = secs;
        self
    }

    pub fn visibility_timeout_secs(mut self, secs: u64) -> Self {
        self.config.queue.visibility_timeout_secs = secs;
        self
    }

    pub fn resolver(mut self, resolver: ScoreResolver) -> Self {
        self.config.evaluation.score_resolver = resolver;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Confidence leaf.
pub fn leaf(confidence: Value, value: Value) -> Value {
    json!({ "confidence": confidence, "value": value })
}

/// What the document-understanding service would report for an invoice.
pub fn invoice_extraction() -> ScoredOutput {
    ScoredOutput {
        result: json!({
            "invoice_number": "INV-2026-001",
            "total": 1620.0,
            "lines": [{"sku": "A-1"}, {"sku": "B-2"}]
        }),
        confidence: json!({
            "invoice_number": leaf(json!(0.97), json!("INV-2026-001")),
            "total": leaf(json!(0.91), json!(1620.0)),
            "lines": [
                {"sku": leaf(json!(0.88), json!("A-1"))},
                {"sku": leaf(json!(0.0), json!("B-2"))}
            ]
        }),
        prompt_tokens: 0,
        completion_tokens: 0,
    }
}

/// What the language model would report after mapping the same invoice.
pub fn invoice_mapping() -> ScoredOutput {
    ScoredOutput {
        result: json!({
            "invoice_number": "INV-2026-001",
            "total": 1620.0,
            "lines": [{"sku": "A-1"}, {"sku": "B-2"}]
        }),
        confidence: json!({
            "invoice_number": leaf(json!(0.93), json!("INV-2026-001")),
            "total": leaf(json!(0.95), json!(1620.0)),
            "lines": [
                {"sku": leaf(json!(0.82), json!("A-1"))},
                {"sku": leaf(Value::Null, json!("B-2"))}
            ]
        }),
        prompt_tokens: 812,
        completion_tokens: 96,
    }
}
