use std::cmp::Reverse;

use ulid::Ulid;

use crate::model::*;
use crate::timefmt;

use super::{Engine, EngineError, SharedResourceState};

/// Earliest first; equal starts ordered by id.
fn sort_by_start(bookings: &mut [Booking]) {
    bookings.sort_by_key(|b| (b.span.start, b.id));
}

impl Engine {
    async fn collect_bookings(
        &self,
        resources: impl IntoIterator<Item = SharedResourceState>,
        keep: impl Fn(&Booking) -> bool,
    ) -> Vec<Booking> {
        let mut out = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            out.extend(guard.bookings.iter().filter(|&b| keep(b)).cloned());
        }
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let rs = self
            .store
            .resource_for_booking(&id)
            .and_then(|rid| self.store.get_resource(&rid))
            .ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// `ListMyBookings`: every booking the user made, latest start first.
    pub async fn list_user_bookings(&self, user_id: Ulid) -> Vec<Booking> {
        let handles = self.store.resources_sorted().into_iter().map(|(_, rs)| rs);
        let mut out = self.collect_bookings(handles, |b| b.user_id == user_id).await;
        out.sort_by_key(|b| Reverse((b.span.start, b.id)));
        out
    }

    /// PENDING bookings across all resources, earliest start first.
    pub async fn list_pending(&self) -> Vec<Booking> {
        let handles = self.store.resources_sorted().into_iter().map(|(_, rs)| rs);
        let mut out = self
            .collect_bookings(handles, |b| b.status == BookingStatus::Pending)
            .await;
        sort_by_start(&mut out);
        out
    }

    /// PENDING bookings on resources owned by `owner_id`, earliest start first.
    pub async fn list_pending_for_owner(&self, owner_id: Ulid) -> Vec<Booking> {
        let handles = self
            .store
            .resources_sorted()
            .into_iter()
            .filter(|(id, _)| {
                self.store
                    .resource_info(id)
                    .is_some_and(|info| info.owner_id == owner_id)
            })
            .map(|(_, rs)| rs);
        let mut out = self
            .collect_bookings(handles, |b| b.status == BookingStatus::Pending)
            .await;
        sort_by_start(&mut out);
        out
    }

    /// Active bookings on a resource starting in `[from, to_exclusive)`.
    pub async fn list_resource_bookings(
        &self,
        resource_id: Ulid,
        from: Ms,
        to_exclusive: Ms,
    ) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.active_between(from, to_exclusive).cloned().collect())
    }

    /// `ListResourceBookings` with calendar days; `to_day` is inclusive.
    pub async fn list_resource_bookings_by_day(
        &self,
        resource_id: Ulid,
        from_day: &str,
        to_day: &str,
    ) -> Result<Vec<Booking>, EngineError> {
        let (from, to_exclusive) = timefmt::day_range(from_day, to_day, self.local_offset)?;
        self.list_resource_bookings(resource_id, from, to_exclusive)
            .await
    }

    /// Conflict check without side effects.
    pub async fn check_conflict(
        &self,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<bool, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidRequest("end must be after start"));
        }
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(super::has_conflict(&guard, &Span::new(start, end)))
    }

    pub fn get_role(&self, user_id: Ulid) -> Result<Role, EngineError> {
        self.store
            .user(&user_id)
            .map(|u| u.role)
            .ok_or(EngineError::NotFound(user_id))
    }

    pub fn get_owner(&self, resource_id: Ulid) -> Result<Ulid, EngineError> {
        self.store
            .resource_info(&resource_id)
            .map(|r| r.owner_id)
            .ok_or(EngineError::NotFound(resource_id))
    }

    pub fn list_categories(&self) -> Vec<Category> {
        let mut out = self.store.categories();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    /// Newest first.
    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut out = self.store.resource_infos();
        out.sort_by_key(|r| Reverse((r.created_at, r.id)));
        out
    }

    pub fn list_resources_by_owner(&self, owner_id: Ulid) -> Vec<ResourceInfo> {
        let mut out = self.list_resources();
        out.retain(|r| r.owner_id == owner_id);
        out
    }
}
