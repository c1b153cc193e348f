//! Authorization predicates. Pure functions of ids and roles; the engine
//! resolves roles and ownership before asking.

use ulid::Ulid;

use crate::model::{Booking, Role};

/// Approve/reject: the resource owner or an admin.
pub fn may_decide(actor_id: Ulid, actor_role: Role, resource_owner_id: Ulid) -> bool {
    actor_role == Role::Admin || actor_id == resource_owner_id
}

/// Only the requester may cancel, admins included.
pub fn may_cancel(actor_id: Ulid, booking: &Booking) -> bool {
    actor_id == booking.user_id
}

pub fn may_manage_categories(role: Role) -> bool {
    role == Role::Admin
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingStatus, Span};

    #[test]
    fn decide_owner_or_admin() {
        let owner = Ulid::new();
        let stranger = Ulid::new();
        assert!(may_decide(owner, Role::Company, owner));
        assert!(may_decide(owner, Role::Individual, owner));
        assert!(may_decide(stranger, Role::Admin, owner));
        assert!(!may_decide(stranger, Role::Company, owner));
    }

    #[test]
    fn cancel_requester_only() {
        let requester = Ulid::new();
        let booking = Booking {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            user_id: requester,
            span: Span::new(0, 1),
            status: BookingStatus::Pending,
            comment: None,
            created_at: 0,
            updated_at: None,
        };
        assert!(may_cancel(requester, &booking));
        assert!(!may_cancel(Ulid::new(), &booking));
    }

    #[test]
    fn categories_admin_only() {
        assert!(may_manage_categories(Role::Admin));
        assert!(!may_manage_categories(Role::Company));
        assert!(!may_manage_categories(Role::Individual));
    }
}
