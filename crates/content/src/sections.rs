//! Multi-section content generation.
//!
//! A generation pass produces many named sections ("offer", "emails",
//! ...). Sections run with bounded parallelism so upstream providers
//! are not flooded, and one section's permanent failure never aborts
//! its siblings: the batch reports partial success and calling code
//! persists whatever succeeded.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use copymill_llm::{
    execute_with_retry, GenerationOptions, GenerationOrchestrator, GenerationTask, LlmError,
    RetryConfig,
};

use crate::extract::parse_json_safe;
use crate::schema::SchemaCatalog;

const DEFAULT_CONCURRENCY: usize = 3;
const JSON_ONLY_INSTRUCTION: &str =
    "Respond with valid JSON only. No prose, no explanations, no markdown fences.";

/// Failure classification surfaced per section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    ProviderUnavailable,
    ProviderCallFailed,
    Timeout,
    MalformedResponse,
    Aborted,
}

fn categorize(err: &LlmError) -> ErrorCategory {
    match err {
        LlmError::NoProviderAvailable => ErrorCategory::ProviderUnavailable,
        LlmError::Timeout { .. } => ErrorCategory::Timeout,
        LlmError::Aborted => ErrorCategory::Aborted,
        LlmError::AllProvidersExhausted { last } => categorize(last),
        LlmError::CallFailed { .. } | LlmError::InvalidRequest { .. } => {
            ErrorCategory::ProviderCallFailed
        }
    }
}

/// One named unit of content to generate.
#[derive(Debug, Clone)]
pub struct SectionTask {
    pub key: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub options: GenerationOptions,
    /// Name of the schema to validate/strip against, if any.
    pub schema: Option<String>,
}

impl SectionTask {
    pub fn new(key: &str, system_prompt: &str, user_prompt: &str) -> Self {
        Self {
            key: key.to_string(),
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            options: GenerationOptions::default(),
            schema: None,
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }
}

/// Output of one section attempt. Replaced wholesale on retry, never
/// mutated.
#[derive(Debug, Clone, Serialize)]
pub struct SectionResult {
    pub key: String,
    /// Unparsed provider output, kept for diagnostics on failure.
    pub raw_text: String,
    pub parsed: Option<Value>,
    pub success: bool,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
}

impl SectionResult {
    fn succeeded(key: String, raw_text: String, parsed: Value) -> Self {
        Self {
            key,
            raw_text,
            parsed: Some(parsed),
            success: true,
            error: None,
            error_category: None,
        }
    }

    fn failed(key: String, raw_text: String, error: String, category: ErrorCategory) -> Self {
        Self {
            key,
            raw_text,
            parsed: None,
            success: false,
            error: Some(error),
            error_category: Some(category),
        }
    }
}

/// Aggregate of one batch pass; order-independent, keyed by section.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub results: HashMap<String, SectionResult>,
    pub successful: usize,
    pub total: usize,
    pub failures: Vec<(String, ErrorCategory)>,
}

impl BatchOutcome {
    /// Explicit user-facing summary: names what could not be
    /// generated, never a silent blank.
    pub fn summary(&self) -> String {
        if self.failures.is_empty() {
            format!("generated {}/{} sections", self.successful, self.total)
        } else {
            let failed: Vec<&str> = self.failures.iter().map(|(k, _)| k.as_str()).collect();
            format!(
                "generated {}/{} sections; failed: {}",
                self.successful,
                self.total,
                failed.join(", ")
            )
        }
    }
}

/// Runs section batches through the orchestrator and the extraction/
/// validation pipeline.
pub struct SectionPipeline {
    orchestrator: Arc<GenerationOrchestrator>,
    catalog: Arc<SchemaCatalog>,
    retry: RetryConfig,
    concurrency: usize,
}

impl SectionPipeline {
    pub fn new(orchestrator: Arc<GenerationOrchestrator>, catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            orchestrator,
            catalog,
            retry: RetryConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Generate every section with bounded parallelism. Uses a bounded
    /// worker pool (a new task starts as soon as a slot frees) rather
    /// than chunk barriers, so uneven task durations do not leave slots
    /// idle.
    pub async fn run(&self, tasks: Vec<SectionTask>) -> BatchOutcome {
        let total = tasks.len();
        let results: Vec<SectionResult> = stream::iter(tasks)
            .map(|task| self.generate_section(task))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcome = BatchOutcome {
            results: HashMap::with_capacity(total),
            successful: 0,
            total,
            failures: Vec::new(),
        };
        for result in results {
            if result.success {
                outcome.successful += 1;
            } else if let Some(category) = result.error_category {
                outcome.failures.push((result.key.clone(), category));
            }
            outcome.results.insert(result.key.clone(), result);
        }

        info!("{}", outcome.summary());
        outcome
    }

    async fn generate_section(&self, task: SectionTask) -> SectionResult {
        let gen_task = GenerationTask::new(&task.system_prompt, &task.user_prompt)
            .with_options(task.options.clone());

        let raw = match execute_with_retry(&self.retry, || self.orchestrator.generate(&gen_task))
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!(section = %task.key, "generation failed: {err}");
                return SectionResult::failed(
                    task.key,
                    String::new(),
                    err.to_string(),
                    categorize(&err),
                );
            }
        };

        match parse_json_safe(&raw) {
            Ok(value) => self.finish(task, raw, value),
            Err(parse_err) => {
                // One retry with a stricter JSON-only instruction; the
                // changed prompt also bypasses any cached response.
                warn!(
                    section = %task.key,
                    "response was not valid JSON ({parse_err}), retrying in JSON-only mode"
                );
                let strict = GenerationTask::new(
                    &format!("{}\n\n{JSON_ONLY_INSTRUCTION}", task.system_prompt),
                    &task.user_prompt,
                )
                .with_options(task.options.clone().json_mode(true));

                match self.orchestrator.generate(&strict).await {
                    Ok(strict_raw) => match parse_json_safe(&strict_raw) {
                        Ok(value) => self.finish(task, strict_raw, value),
                        Err(err) => SectionResult::failed(
                            task.key,
                            strict_raw,
                            err.to_string(),
                            ErrorCategory::MalformedResponse,
                        ),
                    },
                    Err(err) => SectionResult::failed(
                        task.key,
                        raw,
                        err.to_string(),
                        categorize(&err),
                    ),
                }
            }
        }
    }

    /// Apply schema validation as a recovery step: a mismatch is
    /// logged and the stripped value is used; it never fails the
    /// section.
    fn finish(&self, task: SectionTask, raw: String, value: Value) -> SectionResult {
        let Some(schema) = &task.schema else {
            return SectionResult::succeeded(task.key, raw, value);
        };

        let report = self.catalog.validate(schema, &value);
        if !report.success {
            warn!(
                section = %task.key,
                schema = %schema,
                "schema mismatch, proceeding with stripped value: {:?}",
                report.errors
            );
        }
        let stripped = self.catalog.strip_extra_fields(schema, value);
        SectionResult::succeeded(task.key, raw, stripped)
    }
}
