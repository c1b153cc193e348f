use dashmap::DashMap;
use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::model::*;

use super::SharedResourceState;

/// In-memory indexes behind the engine.
///
/// Booking intervals live inside each resource's [`ResourceState`]; callers
/// mutate them only while holding that resource's write guard. Everything
/// else here is directory data keyed by id.
pub struct InMemoryStore {
    users: DashMap<Ulid, UserRecord>,
    emails: DashMap<String, Ulid>,
    categories: DashMap<Ulid, Category>,
    /// Immutable resource descriptions, readable without taking the lock.
    catalog: DashMap<Ulid, ResourceInfo>,
    resources: DashMap<Ulid, SharedResourceState>,
    booking_to_resource: DashMap<Ulid, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            categories: DashMap::new(),
            catalog: DashMap::new(),
            resources: DashMap::new(),
            booking_to_resource: DashMap::new(),
        }
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user(&self, id: &Ulid) -> Option<UserRecord> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn user_id_by_email(&self, email: &str) -> Option<Ulid> {
        self.emails.get(email).map(|e| *e.value())
    }

    pub fn contains_user(&self, id: &Ulid) -> bool {
        self.users.contains_key(id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn users(&self) -> Vec<UserRecord> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    // ── Categories ───────────────────────────────────────────

    pub fn category(&self, id: &Ulid) -> Option<Category> {
        self.categories.get(id).map(|e| e.value().clone())
    }

    pub fn categories(&self) -> Vec<Category> {
        self.categories.iter().map(|e| e.value().clone()).collect()
    }

    pub fn category_in_use(&self, id: &Ulid) -> bool {
        self.catalog.iter().any(|e| e.value().category_id == *id)
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource_info(&self, id: &Ulid) -> Option<ResourceInfo> {
        self.catalog.get(id).map(|e| e.value().clone())
    }

    pub fn resource_infos(&self) -> Vec<ResourceInfo> {
        self.catalog.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    /// All resource handles, sorted by id (the lock acquisition order).
    pub fn resources_sorted(&self) -> Vec<(Ulid, SharedResourceState)> {
        let mut all: Vec<_> = self
            .resources
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    // ── Booking index ────────────────────────────────────────

    pub fn resource_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_resource.get(booking_id).map(|e| *e.value())
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_resource.len()
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event that does not touch booking intervals.
    pub fn apply_directory(&self, event: &Event) {
        match event {
            Event::UserRegistered { user } => {
                self.emails.insert(user.email.clone(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Event::ProfileUpdated { id, email, name } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    if user.email != *email {
                        self.emails.remove(&user.email);
                        self.emails.insert(email.clone(), *id);
                        user.email = email.clone();
                    }
                    user.name = name.clone();
                }
            }
            Event::PasswordChanged { id, password_hash } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    user.password_hash = password_hash.clone();
                }
            }
            Event::CategoryCreated { category } => {
                self.categories.insert(category.id, category.clone());
            }
            Event::CategoryRenamed { id, name } => {
                if let Some(mut category) = self.categories.get_mut(id) {
                    category.name = name.clone();
                }
            }
            Event::CategoryDeleted { id } => {
                self.categories.remove(id);
            }
            Event::ResourceCreated { resource } => {
                self.catalog.insert(resource.id, resource.clone());
                let state = ResourceState::new(resource.clone());
                self.resources
                    .insert(resource.id, std::sync::Arc::new(tokio::sync::RwLock::new(state)));
            }
            // Interval events go through `apply_to_resource`; the cascade
            // through `apply_account_deleted`.
            Event::AccountDeleted { .. }
            | Event::BookingRecorded { .. }
            | Event::BookingDecided { .. }
            | Event::BookingCanceled { .. } => {}
        }
    }

    /// Apply a booking event. The caller holds the resource's write guard.
    pub fn apply_to_resource(&self, rs: &mut ResourceState, event: &Event) {
        match event {
            Event::BookingRecorded { booking } => {
                self.booking_to_resource.insert(booking.id, rs.id());
                rs.insert_booking(booking.clone());
            }
            Event::BookingDecided {
                id,
                status,
                comment,
                at,
                ..
            } => {
                rs.set_status(id, *status, comment.clone(), *at);
            }
            Event::BookingCanceled { id, at, .. } => {
                rs.cancel(id, *at);
            }
            _ => {}
        }
    }

    /// The account-deletion cascade. `guards` must cover every resource the
    /// user owns or has booked.
    pub fn apply_account_deleted(
        &self,
        user_id: Ulid,
        guards: &mut [OwnedRwLockWriteGuard<ResourceState>],
    ) {
        for rs in guards.iter_mut() {
            if rs.info.owner_id == user_id {
                for booking in rs.bookings.drain(..) {
                    self.booking_to_resource.remove(&booking.id);
                }
                self.resources.remove(&rs.id());
                self.catalog.remove(&rs.id());
            } else {
                for id in rs.remove_bookings_by(&user_id) {
                    self.booking_to_resource.remove(&id);
                }
            }
        }
        if let Some((_, user)) = self.users.remove(&user_id) {
            self.emails.remove(&user.email);
        }
    }
}

/// Resource id a booking event applies to.
pub(super) fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingRecorded { booking } => Some(booking.resource_id),
        Event::BookingDecided { resource_id, .. } | Event::BookingCanceled { resource_id, .. } => {
            Some(*resource_id)
        }
        _ => None,
    }
}
