use std::{error::Error, fmt};

use document_store::StoreError;
use model::{dispatch::TransitionError, unit::EmergencyUnit};
use utility::id::Id;

pub mod audit;
pub mod client;
pub mod coordinator;
pub mod fleet;
pub mod incidents;
pub mod intake;
pub mod triage;

pub use client::{Client, LiveView, ProviderClient};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Why the device could not produce a usable point fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationError {
    PermissionDenied,
    Unavailable,
    Timeout,
    Invalid { latitude: f64, longitude: f64 },
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationError::PermissionDenied => write!(f, "location access was denied"),
            LocationError::Unavailable => write!(f, "location is unavailable"),
            LocationError::Timeout => write!(f, "location request timed out"),
            LocationError::Invalid {
                latitude,
                longitude,
            } => write!(f, "({}, {}) is not a valid coordinate", latitude, longitude),
        }
    }
}

/// An operation was refused because of the current state of the records
/// involved. The operator should refresh and re-select.
#[derive(Debug, Clone, PartialEq)]
pub enum PreconditionError {
    Transition(TransitionError),
    /// The records changed between reading and writing them.
    Conflict { subject: String, reason: String },
    UnitOnMission(Id<EmergencyUnit>),
}

impl fmt::Display for PreconditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreconditionError::Transition(why) => write!(f, "{}", why),
            PreconditionError::Conflict { subject, reason } => write!(
                f,
                "{} changed in the meantime ({}), refresh and try again",
                subject, reason
            ),
            PreconditionError::UnitOnMission(id) => {
                write!(f, "unit {} is on a mission", id)
            }
        }
    }
}

#[derive(Debug)]
pub enum RequestError {
    NotFound,
    Forbidden,
    Validation(ValidationError),
    Location(LocationError),
    Precondition(PreconditionError),
    Triage(triage::TriageError),
    Store(StoreError),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::NotFound => write!(f, "the requested item does not exist"),
            RequestError::Forbidden => write!(f, "not allowed to access this item"),
            RequestError::Validation(why) => write!(f, "invalid input: {}", why),
            RequestError::Location(why) => write!(f, "could not acquire location: {}", why),
            RequestError::Precondition(why) => write!(f, "{}", why),
            RequestError::Triage(why) => write!(f, "triage suggestion failed: {}", why),
            RequestError::Store(why) => write!(f, "{}", why),
        }
    }
}

impl Error for RequestError {}

impl From<StoreError> for RequestError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::PreconditionFailed { path, reason } => {
                Self::Precondition(PreconditionError::Conflict {
                    subject: path.to_string(),
                    reason,
                })
            }
            StoreError::AlreadyExists(path) => Self::Precondition(PreconditionError::Conflict {
                subject: path.to_string(),
                reason: "already exists".to_owned(),
            }),
            other => Self::Store(other),
        }
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(value: serde_json::Error) -> Self {
        Self::Store(StoreError::from(value))
    }
}

impl From<ValidationError> for RequestError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<LocationError> for RequestError {
    fn from(value: LocationError) -> Self {
        Self::Location(value)
    }
}

impl From<PreconditionError> for RequestError {
    fn from(value: PreconditionError) -> Self {
        Self::Precondition(value)
    }
}

impl From<TransitionError> for RequestError {
    fn from(value: TransitionError) -> Self {
        Self::Precondition(PreconditionError::Transition(value))
    }
}

impl From<triage::TriageError> for RequestError {
    fn from(value: triage::TriageError) -> Self {
        Self::Triage(value)
    }
}

pub type RequestResult<O> = Result<O, RequestError>;

pub fn not_found_to_none<O>(result: RequestResult<O>) -> RequestResult<Option<O>> {
    if let Err(RequestError::NotFound) = result {
        Ok(None)
    } else {
        result.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document_store::CollectionPath;

    #[test]
    fn store_precondition_becomes_conflict() {
        let error = RequestError::from(StoreError::PreconditionFailed {
            path: CollectionPath::new("providers/P1/units").doc("u1"),
            reason: "field `status` is \"EnRoute\"".to_owned(),
        });
        match error {
            RequestError::Precondition(PreconditionError::Conflict { subject, .. }) => {
                assert_eq!(subject, "providers/P1/units/u1")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unavailable_store_stays_a_store_error() {
        let error = RequestError::from(StoreError::Unavailable("offline".to_owned()));
        assert!(matches!(error, RequestError::Store(_)));
    }

    #[test]
    fn not_found_maps_to_none() {
        assert_eq!(not_found_to_none::<u8>(Err(RequestError::NotFound)).unwrap(), None);
        assert_eq!(not_found_to_none(Ok(3)).unwrap(), Some(3));
        assert!(not_found_to_none::<u8>(Err(RequestError::Forbidden)).is_err());
    }
}
