use stockloan_core::UserId;

/// The user on whose behalf a request acts.
///
/// Inserted by the acting-user middleware; every loan route requires it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActingUser {
    user_id: UserId,
}

impl ActingUser {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
