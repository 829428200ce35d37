//! User preferences (SPEC_FULL.md §4.8).
//!
//! Cross-session key/value pairs, explicitly distinct from episodic content:
//! a preference is a durable fact about the user, not a record of a past
//! task's execution.

use std::collections::HashMap;

use crate::types::UserId;

#[derive(Default)]
pub struct PreferenceStore {
    by_user: HashMap<UserId, HashMap<String, serde_json::Value>>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, user_id: UserId, key: impl Into<String>, value: serde_json::Value) {
        self.by_user.entry(user_id).or_default().insert(key.into(), value);
    }

    pub fn get(&self, user_id: &UserId, key: &str) -> Option<&serde_json::Value> {
        self.by_user.get(user_id)?.get(key)
    }

    pub fn all_for_user(&self, user_id: &UserId) -> HashMap<String, serde_json::Value> {
        self.by_user.get(user_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let mut store = PreferenceStore::new();
        let user: UserId = "u1".into();
        store.set(user.clone(), "language", serde_json::json!("en"));
        assert_eq!(store.get(&user, "language"), Some(&serde_json::json!("en")));
    }

    #[test]
    fn unknown_user_has_no_preferences() {
        let store = PreferenceStore::new();
        assert!(store.all_for_user(&"ghost".into()).is_empty());
    }
}
