use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use turnstile_shared::pii::Masked;

use crate::TicketingError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Attendee,
    Organizer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Attendee => "attendee",
            Role::Organizer => "organizer",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attendee" => Ok(Role::Attendee),
            "organizer" => Ok(Role::Organizer),
            "admin" => Ok(Role::Admin),
            other => Err(IdentityError::UnknownRole(other.to_string())),
        }
    }
}

/// The verified caller, as handed to the core by the auth layer.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    pub email: Masked<String>,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role, email: impl Into<String>) -> Self {
        Self {
            user_id,
            role,
            email: Masked(email.into()),
        }
    }

    pub fn require(&self, role: Role, action: &str) -> Result<(), TicketingError> {
        if self.role == role {
            Ok(())
        } else {
            Err(TicketingError::Forbidden(format!("Only {}s can {}", role, action)))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Organizers may act on their own events; admins on any.
    pub fn can_manage(&self, organizer_id: Uuid) -> bool {
        self.is_admin() || (self.role == Role::Organizer && self.user_id == organizer_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("unknown role: {0}")]
    UnknownRole(String),
}

/// Turns a bearer credential into a [`Principal`]. The core trusts the result as-is.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Principal, IdentityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_is_case_insensitive() {
        assert_eq!("Attendee".parse::<Role>().unwrap(), Role::Attendee);
        assert_eq!(" ORGANIZER ".parse::<Role>().unwrap(), Role::Organizer);
        assert!("guest".parse::<Role>().is_err());
    }

    #[test]
    fn test_require_role() {
        let attendee = Principal::new(Uuid::new_v4(), Role::Attendee, "a@example.com");
        assert!(attendee.require(Role::Attendee, "purchase tickets").is_ok());

        let organizer = Principal::new(Uuid::new_v4(), Role::Organizer, "o@example.com");
        let err = organizer.require(Role::Attendee, "purchase tickets").unwrap_err();
        assert_eq!(err.to_string(), "Only attendees can purchase tickets");
    }

    #[test]
    fn test_can_manage() {
        let organizer_id = Uuid::new_v4();
        let owner = Principal::new(organizer_id, Role::Organizer, "o@example.com");
        let other = Principal::new(Uuid::new_v4(), Role::Organizer, "x@example.com");
        let admin = Principal::new(Uuid::new_v4(), Role::Admin, "root@example.com");
        let attendee = Principal::new(organizer_id, Role::Attendee, "a@example.com");

        assert!(owner.can_manage(organizer_id));
        assert!(!other.can_manage(organizer_id));
        assert!(admin.can_manage(organizer_id));
        assert!(!attendee.can_manage(organizer_id));
    }
}
