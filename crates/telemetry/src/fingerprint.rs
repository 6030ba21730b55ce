//! Structural prompt fingerprints for drift detection.
//!
//! Two hashes are computed: one over the normalised prompt text and one
//! over its skeleton, where every `{identifier}` template placeholder is
//! replaced by `{VAR}`. Prompts rendered from the same template with
//! different variable values therefore share a structure hash.

use invokelens_core::PromptFingerprint;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static TEMPLATE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-zA-Z_]\w*)\}").expect("template variable pattern is valid")
});

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Fingerprint a prompt.
pub fn compute_fingerprint(prompt: &str) -> PromptFingerprint {
    if prompt.is_empty() {
        let empty = sha256_hex("");
        return PromptFingerprint {
            prompt_hash: empty.clone(),
            structure_hash: empty,
            char_count: 0,
            word_count: 0,
            line_count: 0,
            template_vars: Vec::new(),
        };
    }

    let normalized = prompt.trim().to_lowercase();
    let skeleton = TEMPLATE_VAR.replace_all(&normalized, "{VAR}");

    let template_vars: BTreeSet<String> = TEMPLATE_VAR
        .captures_iter(prompt)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();

    PromptFingerprint {
        prompt_hash: sha256_hex(&normalized),
        structure_hash: sha256_hex(&skeleton),
        char_count: prompt.chars().count(),
        word_count: prompt.split_whitespace().count(),
        line_count: prompt.matches('\n').count() + 1,
        template_vars: template_vars.into_iter().collect(),
    }
}

/// Similarity score between two fingerprints in `[0.0, 1.0]`.
///
/// 1.0 for identical text, 0.9 for the same template skeleton, otherwise
/// the mean closeness of the character, word and line counts.
pub fn similarity(a: &PromptFingerprint, b: &PromptFingerprint) -> f64 {
    if a.prompt_hash == b.prompt_hash {
        return 1.0;
    }
    if a.structure_hash == b.structure_hash {
        return 0.9;
    }

    let ratio = |x: usize, y: usize| -> f64 {
        let max = x.max(y);
        if max == 0 {
            1.0
        } else {
            1.0 - x.abs_diff(y) as f64 / max as f64
        }
    };

    let mean = (ratio(a.char_count, b.char_count)
        + ratio(a.word_count, b.word_count)
        + ratio(a.line_count, b.line_count))
        / 3.0;
    mean.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prompt() {
        let fp = compute_fingerprint("");
        assert_eq!(fp.char_count, 0);
        assert_eq!(fp.line_count, 0);
        assert_eq!(fp.prompt_hash, fp.structure_hash);
        assert_eq!(
            fp.prompt_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn normalisation_ignores_case_and_outer_whitespace() {
        let a = compute_fingerprint("Hello World");
        let b = compute_fingerprint("  hello world \n");
        assert_eq!(a.prompt_hash, b.prompt_hash);
    }

    #[test]
    fn counts() {
        let fp = compute_fingerprint("line one\nline two has more words");
        assert_eq!(fp.line_count, 2);
        assert_eq!(fp.word_count, 7);
        assert_eq!(fp.char_count, 32);
    }

    #[test]
    fn template_vars_sorted_and_unique() {
        let fp = compute_fingerprint("Hi {name}, your {order_id} for {name} ships {1bad}");
        assert_eq!(fp.template_vars, vec!["name", "order_id"]);
    }

    #[test]
    fn same_template_shares_structure() {
        let a = compute_fingerprint("Summarize {document} for {audience}");
        let b = compute_fingerprint("Summarize {doc} for {reader}");
        assert_ne!(a.prompt_hash, b.prompt_hash);
        assert_eq!(a.structure_hash, b.structure_hash);
        assert!((similarity(&a, &b) - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn identical_prompts_are_fully_similar() {
        let a = compute_fingerprint("What is the weather?");
        assert!((similarity(&a, &a.clone()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn different_prompts_use_count_ratios() {
        let a = compute_fingerprint("short");
        let b = compute_fingerprint("a much longer prompt\nwith two lines");
        let score = similarity(&a, &b);
        assert!(score > 0.0 && score < 0.9);
    }
}
