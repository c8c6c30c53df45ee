//! Live validation of a generated config.
//!
//! The search operation is replayed through the [`TransformEngine`] in
//! lenient mode and judged per field. The children operation is exercised
//! with the first result afterwards; its problems are only warnings.

use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::transform::{ExecutionMode, ExtractedItem, OperationParams, TransformEngine};
use serde::{Deserialize, Serialize};
use shared::{DynamicProviderConfig, OperationKind};
use tracing::{info, warn};

/// Results looked at per field
const SAMPLE_SIZE: usize = 10;

/// Outcome for one search field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldReport {
    pub field: String,
    pub required: bool,
    /// Sampled results carrying a non-empty value
    pub present: usize,
    /// Sampled results where extraction failed
    pub failed: usize,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub result_count: usize,
    pub field_reports: Vec<FieldReport>,
    /// Search operation error, when it failed outright
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn failed(error: &EngineError) -> Self {
        Self {
            passed: false,
            result_count: 0,
            field_reports: Vec::new(),
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }

    /// Names of the fields that did not pass
    pub fn failed_fields(&self) -> Vec<&str> {
        self.field_reports
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.field.as_str())
            .collect()
    }
}

pub struct Validator<'a> {
    engine: &'a TransformEngine,
}

impl<'a> Validator<'a> {
    pub fn new(engine: &'a TransformEngine) -> Self {
        Self { engine }
    }

    pub async fn validate(
        &self,
        config: &DynamicProviderConfig,
        test_query: &str,
        cancel: &CancelToken,
    ) -> ValidationResult {
        info!(provider = %config.name, query = %test_query, "Validating config");

        let output = match self
            .engine
            .execute(
                config,
                OperationKind::Search,
                &OperationParams::query(test_query),
                ExecutionMode::Lenient,
                cancel,
            )
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(provider = %config.name, error = %e, "Search failed during validation");
                return ValidationResult::failed(&e);
            }
        };

        let sample: Vec<&ExtractedItem> = output.items.iter().take(SAMPLE_SIZE).collect();
        let field_reports: Vec<FieldReport> = config
            .search
            .fields
            .iter()
            .map(|rule| {
                let present = sample.iter().filter(|item| item.get(&rule.name).is_some()).count();
                let failures: Vec<&str> = sample
                    .iter()
                    .flat_map(|item| item.failures.iter())
                    .filter(|f| f.field == rule.name)
                    .map(|f| f.reason.as_str())
                    .collect();
                let passed = if rule.required {
                    present > 0 && failures.is_empty()
                } else {
                    true
                };
                FieldReport {
                    field: rule.name.clone(),
                    required: rule.required,
                    present,
                    failed: failures.len(),
                    passed,
                    first_error: failures.first().map(|s| s.to_string()),
                }
            })
            .collect();

        let mut warnings = Vec::new();
        for report in field_reports.iter().filter(|r| !r.required && r.present == 0 && !sample.is_empty()) {
            warnings.push(format!("optional field '{}' was never extracted", report.field));
        }

        let result_count = output.items.len();
        let passed = result_count > 0 && field_reports.iter().all(|r| r.passed);
        if result_count == 0 {
            warnings.push(format!("search for '{}' returned no results", test_query));
        }

        if let Some(id) = sample.first().and_then(|item| item.get("id")) {
            if let Some(warning) = self.check_children(config, id, cancel).await {
                warnings.push(warning);
            }
        }

        info!(
            provider = %config.name,
            passed,
            results = result_count,
            warnings = warnings.len(),
            "Validation finished"
        );
        ValidationResult {
            passed,
            result_count,
            field_reports,
            error: None,
            warnings,
        }
    }

    /// Advisory check of the children operation
    async fn check_children(&self, config: &DynamicProviderConfig, id: &str, cancel: &CancelToken) -> Option<String> {
        let result = self
            .engine
            .execute(
                config,
                OperationKind::Children,
                &OperationParams::id(id),
                ExecutionMode::Lenient,
                cancel,
            )
            .await;
        match result {
            Ok(output) if output.items.is_empty() => Some(format!("children of '{}' came back empty", id)),
            Ok(_) => None,
            Err(e) => Some(format!("children of '{}' failed: {}", id, e)),
        }
    }
}
