//! People and delegation.

use serde::{Deserialize, Serialize};

use super::ids::UserId;

/// How the signed-in person uses the app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Captures their own stories
    Owner,
    /// Captures stories on behalf of an owner
    Helper,
}

/// A person's profile, as stored under `users/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Helpers allowed to capture on this person's behalf
    #[serde(default)]
    pub helper_ids: Vec<UserId>,
}

impl UserProfile {
    pub fn lists_helper(&self, helper: &UserId) -> bool {
        self.helper_ids.iter().any(|id| id == helper)
    }
}
