//! Policy helpers for lead-agent approval and planning decisions.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Aggregate confidence at or above this threshold skips explicit approval.
pub const CONFIDENCE_THRESHOLD: i64 = 80;

/// Minimum number of truthy heuristic signals before inferring planning intent.
pub const MIN_PLANNING_SIGNALS: usize = 2;

/// Compute aggregate confidence from rubric score components.
pub fn compute_confidence(rubric_scores: &HashMap<String, i64>) -> i64 {
    rubric_scores.values().sum()
}

/// Return whether an action must go through explicit approval.
pub fn approval_required(confidence: i64, is_external: bool, is_risky: bool) -> bool {
    is_external || is_risky || confidence < CONFIDENCE_THRESHOLD
}

/// Infer planning intent from boolean heuristic signals.
///
/// Requires at least two planning signals to avoid spam on general boards.
pub fn infer_planning(signals: &HashMap<String, bool>) -> bool {
    signals.values().filter(|v| **v).count() >= MIN_PLANNING_SIGNALS
}

/// Build a stable hash key for deduplicating similar board tasks.
pub fn task_fingerprint(title: &str, description: Option<&str>, board_id: Uuid) -> String {
    let normalized_title = title.trim().to_lowercase();
    let normalized_desc = description.unwrap_or("").trim().to_lowercase();
    let seed = format!("{board_id}::{normalized_title}::{normalized_desc}");
    let digest = Sha256::digest(seed.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_sums_rubric_components() {
        let scores = HashMap::from([
            ("clarity".to_string(), 30),
            ("scope".to_string(), 25),
            ("risk".to_string(), 30),
        ]);
        assert_eq!(compute_confidence(&scores), 85);
    }

    #[test]
    fn approval_gates_on_threshold_and_flags() {
        assert!(!approval_required(85, false, false));
        assert!(approval_required(79, false, false));
        assert!(approval_required(95, true, false));
        assert!(approval_required(95, false, true));
    }

    #[test]
    fn planning_requires_two_signals() {
        let one = HashMap::from([("has_milestones".to_string(), true)]);
        assert!(!infer_planning(&one));
        let two = HashMap::from([
            ("has_milestones".to_string(), true),
            ("mentions_deadline".to_string(), true),
            ("is_question".to_string(), false),
        ]);
        assert!(infer_planning(&two));
    }

    #[test]
    fn fingerprint_normalizes_case_and_whitespace() {
        let board = Uuid::new_v4();
        let a = task_fingerprint("  Fix Login Bug ", Some("retry flow"), board);
        let b = task_fingerprint("fix login bug", Some("  RETRY FLOW "), board);
        assert_eq!(a, b);
        let other_board = task_fingerprint("fix login bug", Some("retry flow"), Uuid::new_v4());
        assert_ne!(a, other_board);
    }
}
