use schemars::JsonSchema;
use utility::id::HasId;

/// The organisation owning a fleet. Its id is the dispatcher account's user
/// id, the provider itself has no stored record.
#[derive(Debug, Clone, JsonSchema)]
pub struct Provider;

impl HasId for Provider {
    type IdType = String;
}
