//! Natural-language capability matching
//!
//! Scores every capability against a lowercased task string. Longer keyword
//! hits outweigh shorter ones; exact name/id mentions outrank keywords.

use crate::capability::Capability;

/// Bonus for the capability's human name appearing in the task.
const NAME_BONUS: u32 = 10;
/// Bonus for the capability's id appearing in the task.
const ID_BONUS: u32 = 15;

/// Sequencing phrases that suggest the caller wants a chain.
const SEQUENCE_PHRASES: &[&str] = &[
    "then", "and then", "after that", "next", "pipe", "chain",
];

/// Action verbs counted for the multi-step heuristic.
const ACTION_VERBS: &[&str] = &[
    "scrape", "screenshot", "extract", "convert", "generate", "search", "resize", "parse",
    "shorten", "validate", "lookup", "upload", "format",
];

/// Score one capability against a task. Zero means no affinity.
pub fn score(capability: &Capability, task_lower: &str) -> u32 {
    let mut total = 0u32;
    for keyword in &capability.keywords {
        if task_lower.contains(keyword.as_str()) {
            total += keyword.len() as u32;
        }
    }
    if task_lower.contains(&capability.name.to_lowercase()) {
        total += NAME_BONUS;
    }
    if task_lower.contains(&capability.id.to_lowercase()) {
        total += ID_BONUS;
    }
    total
}

/// Pick the best-scoring capability, or `None` when nothing scores above
/// zero. Ties resolve to catalog order.
pub fn best_match<'a, I>(capabilities: I, task: &str) -> Option<&'a Capability>
where
    I: IntoIterator<Item = &'a Capability>,
{
    let task_lower = task.to_lowercase();
    let mut best: Option<(&Capability, u32)> = None;
    for capability in capabilities {
        let s = score(capability, &task_lower);
        if s == 0 {
            continue;
        }
        match best {
            Some((_, existing)) if existing >= s => {}
            _ => best = Some((capability, s)),
        }
    }
    best.map(|(capability, _)| capability)
}

/// Whether a task reads like a multi-step chain.
///
/// True when the task contains a sequencing phrase, a `convert X to Y`
/// form, or at least two distinct action verbs. The hint is advisory:
/// single-step dispatch proceeds either way.
pub fn looks_multi_step(task: &str) -> bool {
    let lower = task.to_lowercase();

    for phrase in SEQUENCE_PHRASES {
        // Whole-word check so "authentic" does not trip on "then".
        if contains_word(&lower, phrase) {
            return true;
        }
    }

    if let Some(pos) = lower.find("convert ") {
        if lower[pos..].contains(" to ") {
            return true;
        }
    }

    let verbs = ACTION_VERBS
        .iter()
        .filter(|verb| contains_word(&lower, verb))
        .count();
    verbs >= 2
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before_ok = start == 0
            || !haystack[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let end = start + needle.len();
        let after_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        before_ok && after_ok
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::builtin_catalog;

    fn catalog() -> Vec<crate::capability::Capability> {
        builtin_catalog("http://127.0.0.1:9000").unwrap()
    }

    #[test]
    fn test_screenshot_task_matches_screenshot() {
        let catalog = catalog();
        let found = best_match(&catalog, "take a screenshot of https://example.com").unwrap();
        assert_eq!(found.id, "screenshot");
    }

    #[test]
    fn test_id_mention_beats_keyword_overlap() {
        let catalog = catalog();
        // "domain-intel" id is worth 15 + keyword hits, more than
        // email-validate could collect from this phrasing.
        let found = best_match(&catalog, "run domain-intel on example.com").unwrap();
        assert_eq!(found.id, "domain-intel");
    }

    #[test]
    fn test_no_match_yields_none() {
        let catalog = catalog();
        assert!(best_match(&catalog, "fold my laundry").is_none());
    }

    #[test]
    fn test_multi_step_phrases() {
        assert!(looks_multi_step("scrape https://a.com then make a pdf"));
        assert!(looks_multi_step("convert this markdown to pdf"));
        assert!(looks_multi_step("screenshot the page and extract the text"));
        assert!(!looks_multi_step("take a screenshot of https://a.com"));
        // "then" embedded in a word must not count.
        assert!(!looks_multi_step("screenshot authentic-site.com"));
    }
}
