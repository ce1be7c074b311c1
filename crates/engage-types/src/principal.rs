use crate::id::UserId;

/// Authenticated caller identity, supplied by the auth collaborator.
///
/// The engine never parses credentials; it trusts the principal handed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Principal {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }
}
