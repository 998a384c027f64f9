use std::fmt::Debug;

use schemars::JsonSchema;
use serde::Serialize;
pub use serde_with;
use utility::id::{HasId, Id};

pub mod assignment;
pub mod audit;
pub mod dispatch;
pub mod identity;
pub mod incident;
pub mod provider;
pub mod triage;
pub mod unit;

pub trait ExampleData {
    fn example_data() -> Self;
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct WithId<V>
where
    V: HasId,
    V::IdType: Serialize + Debug + Clone,
{
    pub id: Id<V>,
    #[serde(flatten)]
    pub content: V,
}

impl<V> WithId<V>
where
    V: HasId,
    V::IdType: Serialize + Debug + Clone,
{
    pub fn new(id: Id<V>, content: V) -> Self {
        Self { id, content }
    }
}
