//! IdTag domain entity

use chrono::{DateTime, Utc};

/// IdTag authorization status (OCPP 1.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdTagStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
}

impl std::fmt::Display for IdTagStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Blocked => write!(f, "Blocked"),
            Self::Expired => write!(f, "Expired"),
            Self::Invalid => write!(f, "Invalid"),
        }
    }
}

/// RFID card / authorization token bound to a driver
#[derive(Debug, Clone)]
pub struct IdTag {
    pub id_tag: String,
    pub driver_id: String,
    pub blocked: bool,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl IdTag {
    pub fn new(id_tag: impl Into<String>, driver_id: impl Into<String>) -> Self {
        Self {
            id_tag: id_tag.into(),
            driver_id: driver_id.into(),
            blocked: false,
            expiry_date: None,
        }
    }

    /// OCPP authorization status of this tag at `now`
    pub fn auth_status(&self, now: DateTime<Utc>) -> IdTagStatus {
        if self.blocked {
            return IdTagStatus::Blocked;
        }
        match self.expiry_date {
            Some(expiry) if now > expiry => IdTagStatus::Expired,
            _ => IdTagStatus::Accepted,
        }
    }
}

/// Outcome of an authorization lookup against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub status: IdTagStatus,
    /// Driver owning the tag; `None` for unknown tags
    pub driver_id: Option<String>,
}

impl Authorization {
    pub fn invalid() -> Self {
        Self {
            status: IdTagStatus::Invalid,
            driver_id: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == IdTagStatus::Accepted
    }
}
