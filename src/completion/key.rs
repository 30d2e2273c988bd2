//! Content-addressed cache keys for conversations.
//! Key: SHA-256 of the canonical JSON of the ordered turns, lowercase hex.
//!
//! Canonical JSON: array in input order, each turn an object with sorted keys,
//! `", "` and `": "` separators, non-ASCII kept raw. This matches the digests
//! the previous service stored, so existing `llm:` entries stay reachable.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::ConversationTurn;

/// Namespace for completion entries in the shared store.
pub const KEY_PREFIX: &str = "llm:";

/// Canonical text of a conversation. Keys are written in sorted order
/// (`content` < `role`); string escaping is serde_json's.
pub fn canonical_json(turns: &[ConversationTurn]) -> String {
    let objects: Vec<String> = turns
        .iter()
        .map(|t| {
            format!(
                r#"{{"content": {}, "role": {}}}"#,
                Value::from(t.content.as_str()),
                Value::from(t.role.as_str())
            )
        })
        .collect();
    format!("[{}]", objects.join(", "))
}

/// Compute the hex digest identifying a conversation.
pub fn derive_cache_key(turns: &[ConversationTurn]) -> String {
    let digest = Sha256::digest(canonical_json(turns).as_bytes());
    format!("{digest:x}")
}

/// Store key for a digest, i.e. `llm:<digest>`.
pub fn storage_key(digest: &str) -> String {
    format!("{KEY_PREFIX}{digest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Role;

    #[test]
    fn canonical_form_sorts_keys_and_spaces_separators() {
        let turns = vec![ConversationTurn::user("2+2=?")];
        assert_eq!(
            canonical_json(&turns),
            r#"[{"content": "2+2=?", "role": "user"}]"#
        );
    }

    #[test]
    fn digest_matches_previous_service() {
        let turns = vec![ConversationTurn::user("2+2=?")];
        assert_eq!(
            derive_cache_key(&turns),
            "85963fdebdefdb9c4ecd7fb9f88d6996f4ea56023ab95009b6100c8465338ca6"
        );
    }

    #[test]
    fn digest_matches_previous_service_with_escapes_and_cyrillic() {
        let turns = vec![
            ConversationTurn::system("Ты — Айя.\nline\t\"q\""),
            ConversationTurn::user("Почему 2+2=4?"),
        ];
        assert_eq!(
            derive_cache_key(&turns),
            "adc28c2be9d0c6982b9ea0cbe6ffb0338232c180711bfef849b1781942494dbc"
        );
    }

    #[test]
    fn deterministic() {
        let turns = vec![
            ConversationTurn::system("be kind"),
            ConversationTurn::user("hello"),
        ];
        assert_eq!(derive_cache_key(&turns), derive_cache_key(&turns.clone()));
    }

    #[test]
    fn order_changes_key() {
        let ab = vec![ConversationTurn::user("a"), ConversationTurn::user("b")];
        let ba = vec![ConversationTurn::user("b"), ConversationTurn::user("a")];
        assert_ne!(derive_cache_key(&ab), derive_cache_key(&ba));
    }

    #[test]
    fn trailing_space_changes_key() {
        let a = vec![ConversationTurn::user("a")];
        let a_space = vec![ConversationTurn::user("a ")];
        assert_ne!(derive_cache_key(&a), derive_cache_key(&a_space));
    }

    #[test]
    fn role_changes_key() {
        let user = vec![ConversationTurn::new(Role::User, "hi")];
        let ayya = vec![ConversationTurn::new(Role::Ayya, "hi")];
        assert_ne!(derive_cache_key(&user), derive_cache_key(&ayya));
    }

    #[test]
    fn unlisted_role_hashes_as_received() {
        let turns: Vec<ConversationTurn> = serde_json::from_str(
            r#"[{"role":"user","content":"2+2=?"},{"role":"assistant","content":"4"}]"#,
        )
        .unwrap();
        assert_eq!(
            canonical_json(&turns),
            r#"[{"content": "2+2=?", "role": "user"}, {"content": "4", "role": "assistant"}]"#
        );
        assert_eq!(
            derive_cache_key(&turns),
            "dcc46cc11d5d41a810c8f9781a38f8e913f3dcfe2005f6448b95093f37daba4b"
        );
    }

    #[test]
    fn key_shape() {
        let digest = derive_cache_key(&[]);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(storage_key(&digest), format!("llm:{digest}"));
    }
}
