use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::BOOKINGS_TOTAL;
use crate::timefmt;

use super::conflict::{check_no_conflict, now_ms, validate_request};
use super::directory::optional_text;
use super::policy::{may_cancel, may_decide};
use super::{Engine, EngineError};

impl Engine {
    /// `CreateBooking` with wire timestamps (RFC3339 or a bare local literal).
    pub async fn request_booking(
        &self,
        requester: Ulid,
        resource: Ulid,
        start_at: &str,
        end_at: &str,
    ) -> Result<Ulid, EngineError> {
        let start = timefmt::parse_instant(start_at, self.local_offset)?;
        let end = timefmt::parse_instant(end_at, self.local_offset)?;
        self.create_booking(requester, resource, start, end).await
    }

    pub async fn create_booking(
        &self,
        requester: Ulid,
        resource: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Ulid, EngineError> {
        self.create_booking_at(requester, resource, start, end, now_ms()).await
    }

    /// Validate, then check and insert under the resource's write lock.
    pub async fn create_booking_at(
        &self,
        requester: Ulid,
        resource: Ulid,
        start: Ms,
        end: Ms,
        now: Ms,
    ) -> Result<Ulid, EngineError> {
        let span = validate_request(requester, resource, start, end, now)?;

        let _gate = self.directory_gate.read().await;
        if !self.store.contains_user(&requester) {
            return Err(EngineError::NotFound(requester));
        }
        let rs = self
            .store
            .get_resource(&resource)
            .ok_or(EngineError::NotFound(resource))?;
        let mut guard = rs.write().await;

        if let Err(e) = check_no_conflict(&guard, &span) {
            debug!("booking request on {resource} rejected: {e}");
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => "conflict").increment(1);
            return Err(e);
        }

        let booking = Booking {
            id: Ulid::new(),
            resource_id: resource,
            user_id: requester,
            span,
            status: BookingStatus::Pending,
            comment: None,
            created_at: now,
            updated_at: None,
        };
        let id = booking.id;
        self.persist_and_apply(&mut guard, &Event::BookingRecorded { booking })
            .await?;

        info!("booking {id} requested on {resource} by {requester}");
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => "requested").increment(1);
        Ok(id)
    }

    pub async fn decide_booking(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
        actor_role: Role,
        new_status: BookingStatus,
        comment: Option<String>,
    ) -> Result<(), EngineError> {
        self.decide_booking_at(booking_id, actor_id, actor_role, new_status, comment, now_ms())
            .await
    }

    /// `UpdateBookingStatus`: approve or reject a PENDING booking.
    pub async fn decide_booking_at(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
        actor_role: Role,
        new_status: BookingStatus,
        comment: Option<String>,
        now: Ms,
    ) -> Result<(), EngineError> {
        if !matches!(new_status, BookingStatus::Approved | BookingStatus::Rejected) {
            return Err(EngineError::InvalidRequest("status must be APPROVED or REJECTED"));
        }
        let comment = optional_text(comment.as_deref(), "comment too long")?;

        let mut guard = self.resolve_booking_write(&booking_id).await?;
        if !may_decide(actor_id, actor_role, guard.info.owner_id) {
            return Err(EngineError::Forbidden);
        }
        let current = guard
            .booking(&booking_id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(booking_id))?;
        if current != BookingStatus::Pending {
            return Err(EngineError::InvalidRequest("only PENDING bookings may be decided"));
        }

        let resource_id = guard.id();
        let event = Event::BookingDecided {
            id: booking_id,
            resource_id,
            status: new_status,
            comment,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        info!("booking {booking_id} {} by {actor_id}", new_status.as_str());
        let outcome = match new_status {
            BookingStatus::Approved => "approved",
            _ => "rejected",
        };
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        Ok(())
    }

    pub async fn cancel_booking(&self, booking_id: Ulid, requester: Ulid) -> Result<(), EngineError> {
        self.cancel_booking_at(booking_id, requester, now_ms()).await
    }

    /// Requester-initiated cancellation, at least two hours before start.
    pub async fn cancel_booking_at(
        &self,
        booking_id: Ulid,
        requester: Ulid,
        now: Ms,
    ) -> Result<(), EngineError> {
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;

        if !may_cancel(requester, &booking) {
            return Err(EngineError::Forbidden);
        }
        if !booking.status.is_active() {
            return Err(EngineError::InvalidRequest(
                "only PENDING or APPROVED bookings may be canceled",
            ));
        }
        if booking.span.start - now < CANCEL_CUTOFF_MS {
            return Err(EngineError::InvalidRequest(
                "cancellation cutoff: less than 2 hours before start",
            ));
        }

        let event = Event::BookingCanceled {
            id: booking_id,
            resource_id: booking.resource_id,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        info!("booking {booking_id} canceled by {requester}");
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => "canceled").increment(1);
        Ok(())
    }

    /// Remove a user together with their bookings, their resources and every
    /// booking on those resources. One WAL record, applied under every
    /// affected resource lock.
    pub async fn delete_account(&self, user_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.directory_gate.write().await;
        if !self.store.contains_user(&user_id) {
            return Err(EngineError::NotFound(user_id));
        }

        // With the gate held no booking by this user can appear, so the
        // affected set cannot grow between this scan and the write locks.
        let mut affected = Vec::new();
        for (_, rs) in self.store.resources_sorted() {
            let touched = {
                let guard = rs.read().await;
                guard.info.owner_id == user_id || guard.bookings.iter().any(|b| b.user_id == user_id)
            };
            if touched {
                affected.push(rs);
            }
        }
        let mut guards = Vec::with_capacity(affected.len());
        for rs in affected {
            guards.push(rs.write_owned().await);
        }

        self.wal_append(&Event::AccountDeleted { id: user_id }).await?;
        self.store.apply_account_deleted(user_id, &mut guards);

        info!("account {user_id} deleted ({} resources touched)", guards.len());
        Ok(())
    }
}
