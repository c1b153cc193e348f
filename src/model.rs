use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Open/open overlap: touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Canceled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(BookingStatus::Pending),
            "APPROVED" => Some(BookingStatus::Approved),
            "REJECTED" => Some(BookingStatus::Rejected),
            "CANCELED" | "CANCELLED" => Some(BookingStatus::Canceled),
            _ => None,
        }
    }

    /// PENDING and APPROVED bookings reserve capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Individual,
    Company,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Individual => "INDIVIDUAL",
            Role::Company => "COMPANY",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INDIVIDUAL" | "" => Some(Role::Individual),
            "COMPANY" => Some(Role::Company),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub comment: Option<String>,
    pub created_at: Ms,
    pub updated_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub category_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub price_per_hour: i64,
    pub is_active: bool,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Ulid,
    pub name: String,
    pub created_at: Ms,
}

/// Stored account, including credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
    pub created_at: Ms,
}

/// Public view of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub created_at: Ms,
}

impl From<&UserRecord> for UserInfo {
    fn from(u: &UserRecord) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            name: u.name.clone(),
            role: u.role,
            created_at: u.created_at,
        }
    }
}

/// A resource together with every booking ever made against it.
///
/// The write guard over this struct is the transaction context for the
/// interval store operations below: check and insert happen under one guard.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub info: ResourceInfo,
    /// All bookings (any status), sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl ResourceState {
    pub fn new(info: ResourceInfo) -> Self {
        Self {
            info,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.info.id
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings of any status whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Active bookings overlapping `span`.
    pub fn count_overlapping(&self, span: &Span) -> usize {
        self.overlapping(span).filter(|b| b.status.is_active()).count()
    }

    /// Active bookings with `from <= start < to_exclusive`, earliest first.
    pub fn active_between(&self, from: Ms, to_exclusive: Ms) -> impl Iterator<Item = &Booking> {
        let lo = self.bookings.partition_point(|b| b.span.start < from);
        let hi = self.bookings.partition_point(|b| b.span.start < to_exclusive);
        self.bookings[lo..hi.max(lo)]
            .iter()
            .filter(|b| b.status.is_active())
    }

    /// Set status and reviewer comment. Returns false if the booking is absent.
    pub fn set_status(&mut self, id: &Ulid, status: BookingStatus, comment: Option<String>, at: Ms) -> bool {
        match self.booking_mut(id) {
            Some(b) => {
                b.status = status;
                b.comment = comment;
                b.updated_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Mark canceled, leaving the comment untouched.
    pub fn cancel(&mut self, id: &Ulid, at: Ms) -> bool {
        match self.booking_mut(id) {
            Some(b) => {
                b.status = BookingStatus::Canceled;
                b.updated_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Drop every booking made by `user_id`, returning the removed ids.
    pub fn remove_bookings_by(&mut self, user_id: &Ulid) -> Vec<Ulid> {
        let mut removed = Vec::new();
        self.bookings.retain(|b| {
            if b.user_id == *user_id {
                removed.push(b.id);
                false
            } else {
                true
            }
        });
        removed
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: UserRecord,
    },
    ProfileUpdated {
        id: Ulid,
        email: String,
        name: String,
    },
    PasswordChanged {
        id: Ulid,
        password_hash: String,
    },
    /// Removes the user, their bookings, their resources and every booking
    /// on those resources. One record so replay is all-or-nothing.
    AccountDeleted {
        id: Ulid,
    },
    CategoryCreated {
        category: Category,
    },
    CategoryRenamed {
        id: Ulid,
        name: String,
    },
    CategoryDeleted {
        id: Ulid,
    },
    ResourceCreated {
        resource: ResourceInfo,
    },
    /// New request (always PENDING live); compaction also writes the current
    /// record of older bookings through this variant.
    BookingRecorded {
        booking: Booking,
    },
    BookingDecided {
        id: Ulid,
        resource_id: Ulid,
        status: BookingStatus,
        comment: Option<String>,
        at: Ms,
    },
    BookingCanceled {
        id: Ulid,
        resource_id: Ulid,
        at: Ms,
    },
}
