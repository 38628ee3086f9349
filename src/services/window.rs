use crate::domains::chat::{Message, Role};

/// Builds the model context for `target_id` from a most-recent-first
/// `history`: everything strictly older than the target, oldest first, with
/// the persona preamble in front. Returns `None` when the target is not in
/// `history`.
pub fn build_window(history: Vec<Message>, target_id: &str, preamble: String) -> Option<Vec<Message>> {
    let target_index = history.iter().position(|m| m.id == target_id)?;
    let target = &history[target_index];

    let system = Message::new(
        format!("{target_id}:preamble"),
        target.chat_id.clone(),
        Role::System,
        preamble,
        target.created_at,
    );

    let mut window = Vec::with_capacity(history.len() - target_index);
    window.push(system);
    window.extend(history.into_iter().skip(target_index + 1).rev());
    Some(window)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, role: Role, content: &str, created_at: i64) -> Message {
        Message::new(id, "c1", role, content, created_at)
    }

    fn newest_first() -> Vec<Message> {
        vec![
            msg("m5", Role::Assistant, "later reply", 5),
            msg("m4", Role::User, "later", 4),
            msg("m3", Role::Assistant, "", 3),
            msg("m2", Role::User, "how are you", 2),
            msg("m1", Role::User, "hi", 1),
        ]
    }

    #[test]
    fn keeps_only_messages_older_than_target_in_chronological_order() {
        let window = build_window(newest_first(), "m3", "You are Max.".to_string()).unwrap();
        let ids: Vec<&str> = window.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3:preamble", "m1", "m2"]);
        assert_eq!(window[0].role, Role::System);
        assert_eq!(window[0].content, "You are Max.");
        assert_eq!(window[0].chat_id, "c1");
    }

    #[test]
    fn oldest_target_yields_preamble_only() {
        let window = build_window(newest_first(), "m1", "p".to_string()).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].role, Role::System);
    }

    #[test]
    fn newest_target_keeps_everything_else() {
        let window = build_window(newest_first(), "m5", "p".to_string()).unwrap();
        let ids: Vec<&str> = window.iter().skip(1).map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn missing_target_yields_none() {
        assert!(build_window(newest_first(), "nope", "p".to_string()).is_none());
        assert!(build_window(Vec::new(), "m1", "p".to_string()).is_none());
    }
}
