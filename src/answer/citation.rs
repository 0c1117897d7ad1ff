//! Citation marker extraction

use super::Citation;
use crate::rag::RankedResult;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid citation regex"));

/// Valid `[n]` markers in order of first appearance, for `n` in `1..=context_len`
pub fn extract_markers(answer: &str, context_len: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    MARKER
        .captures_iter(answer)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
        .filter(|n| (1..=context_len).contains(n))
        .filter(|n| seen.insert(*n))
        .collect()
}

fn citation(number: usize, result: &RankedResult) -> Citation {
    Citation {
        number,
        fragment_id: result.hit.fragment_id.clone(),
        document_id: result.hit.document_id.clone(),
        document_name: result.hit.metadata.document_name.clone(),
        relevance_score: result.adjusted_score,
    }
}

/// Map markers in `answer` back to the fragments placed in the prompt
///
/// Explicit markers win; only the fragments they name are cited. Without
/// any valid marker every context fragment is cited.
pub fn extract_citations(answer: &str, context: &[RankedResult]) -> Vec<Citation> {
    if context.is_empty() {
        return Vec::new();
    }

    let markers = extract_markers(answer, context.len());
    if markers.is_empty() {
        return cite_all(context);
    }

    markers.into_iter().map(|n| citation(n, &context[n - 1])).collect()
}

/// Cite every context fragment in marker order
pub fn cite_all(context: &[RankedResult]) -> Vec<Citation> {
    context
        .iter()
        .enumerate()
        .map(|(index, result)| citation(index + 1, result))
        .collect()
}
