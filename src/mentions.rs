//! Extraction and matching of `@mention` tokens in comment and memory text.

use crate::types::Agent;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Mention tokens are single, space-free words (e.g. "@alex", "@lead").
    RE.get_or_init(|| Regex::new(r"@([A-Za-z][\w-]{0,31})").expect("valid mention regex"))
}

/// Extract normalized mention handles from a message body.
pub fn extract_mentions(message: &str) -> HashSet<String> {
    mention_re()
        .captures_iter(message)
        .map(|cap| cap[1].to_ascii_lowercase())
        .collect()
}

/// Return whether a mention set targets the provided agent.
pub fn matches_agent_mention(agent: &Agent, mentions: &HashSet<String>) -> bool {
    if mentions.is_empty() {
        return false;
    }

    // "@lead" is a reserved shortcut that always targets the board lead.
    if agent.is_board_lead && mentions.contains("lead") {
        return true;
    }

    let name = agent.name.trim();
    if name.is_empty() {
        return false;
    }

    let normalized = name.to_ascii_lowercase();
    if normalized != "lead" && mentions.contains(&normalized) {
        return true;
    }

    // Mentions are single tokens; match on first name for display names with spaces.
    match normalized.split_whitespace().next() {
        Some(first) if first != "lead" => mentions.contains(first),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentStatus;
    use uuid::Uuid;

    fn agent(name: &str, is_lead: bool) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            board_id: Some(Uuid::new_v4()),
            name: name.to_string(),
            status: AgentStatus::Active,
            openclaw_session_id: None,
            agent_token_hash: None,
            heartbeat_config: None,
            identity_profile: None,
            provision_requested_at: None,
            provision_action: None,
            last_seen_at: None,
            is_board_lead: is_lead,
            pending_sync: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn extracts_and_normalizes_handles() {
        let mentions = extract_mentions("ping @Alex and @ava-2, not alex@example.com");
        assert!(mentions.contains("alex"));
        assert!(mentions.contains("ava-2"));
        assert!(mentions.contains("example"));
        assert_eq!(extract_mentions("no mentions here").len(), 0);
    }

    #[test]
    fn lead_shortcut_targets_board_lead_only() {
        let mentions = extract_mentions("@lead please triage");
        assert!(matches_agent_mention(&agent("Ava", true), &mentions));
        assert!(!matches_agent_mention(&agent("Ava", false), &mentions));
    }

    #[test]
    fn display_names_match_on_first_name() {
        let mentions = extract_mentions("cc @ava");
        assert!(matches_agent_mention(&agent("Ava Chen", false), &mentions));
        assert!(!matches_agent_mention(&agent("Ben Ortiz", false), &mentions));
    }

    #[test]
    fn empty_names_never_match() {
        let mentions = extract_mentions("@lead @someone");
        assert!(!matches_agent_mention(&agent("   ", false), &mentions));
    }
}
