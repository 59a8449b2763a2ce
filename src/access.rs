// Role-membership gates

use std::collections::HashSet;

use crate::interaction::Member;
use crate::platform::RoleId;

/// Grants access when the member holds at least one of the allowed roles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGate {
    allowed: HashSet<RoleId>,
    open_when_empty: bool,
}

impl RoleGate {
    /// Gate that denies everyone when `roles` is empty
    pub fn new(roles: impl IntoIterator<Item = RoleId>) -> Self {
        Self {
            allowed: roles.into_iter().collect(),
            open_when_empty: false,
        }
    }

    /// Gate that lets everyone through when `roles` is empty
    pub fn optional(roles: impl IntoIterator<Item = RoleId>) -> Self {
        Self {
            open_when_empty: true,
            ..Self::new(roles)
        }
    }

    /// A missing member (DM, uncached) never passes a non-empty gate
    pub fn permits(&self, member: Option<&Member>) -> bool {
        if self.allowed.is_empty() {
            return self.open_when_empty;
        }
        member.is_some_and(|m| m.has_any_role(&self.allowed))
    }
}
