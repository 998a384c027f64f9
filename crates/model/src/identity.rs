use std::{fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::Id;

use crate::provider::Provider;

/// The portals a signed in user can act through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Role {
    Admin,
    Patient,
    Doctor,
    Dispatcher,
    Lab,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Patient => "Patient",
            Role::Doctor => "Doctor",
            Role::Dispatcher => "Dispatcher",
            Role::Lab => "Lab",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role '{}'", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            "dispatcher" | "emergency" | "emergency-dispatch" => Ok(Role::Dispatcher),
            "lab" => Ok(Role::Lab),
            other => Err(UnknownRole(other.to_owned())),
        }
    }
}

/// The authenticated user as handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn new<S: Into<String>>(id: S, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Dispatchers act as the provider owning their fleet.
    pub fn acts_for(&self, provider: &Id<Provider>) -> bool {
        self.role == Role::Dispatcher && provider.raw_ref::<str>() == self.id
    }
}
