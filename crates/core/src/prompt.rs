//! Prompt fingerprint data carried on events.

use serde::{Deserialize, Serialize};

/// Structural fingerprint of a prompt, used server-side for drift detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptFingerprint {
    /// SHA-256 (hex) of the trimmed, lower-cased prompt.
    pub prompt_hash: String,
    /// SHA-256 (hex) of the prompt skeleton with template variables replaced.
    pub structure_hash: String,
    pub char_count: usize,
    pub word_count: usize,
    pub line_count: usize,
    /// Sorted, de-duplicated `{name}` template variables.
    pub template_vars: Vec<String>,
}
