//! Generic fallback: always matches, with a low score.

use super::Evidence;
use crate::error::GenerationError;
use crate::generator;
use shared::{ContentType, DynamicProviderConfig};

const GENERIC_SCORE: f64 = 10.0;

pub fn score(_evidence: &Evidence<'_>) -> f64 {
    GENERIC_SCORE
}

pub fn apply(
    evidence: &Evidence<'_>,
    name: &str,
    content_type: Option<ContentType>,
) -> Result<DynamicProviderConfig, GenerationError> {
    let mut config = generator::generate(evidence, name, content_type)?;
    config.template_id = "generic".to_string();
    Ok(config)
}
