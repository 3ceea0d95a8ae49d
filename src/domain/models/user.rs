//! Minimal user record.
//!
//! `spec.md` itself has no user-identity concept, but every gateway
//! operation is attributable to a caller in practice (audit trail,
//! per-user HIL routing), so we carry a thin `User` row the way the
//! teacher's adapters carry identity alongside its domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(external_id: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), external_id: external_id.into(), display_name: None, created_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_has_no_display_name_by_default() {
        let user = User::new("external-123");
        assert_eq!(user.external_id, "external-123");
        assert!(user.display_name.is_none());
    }
}
