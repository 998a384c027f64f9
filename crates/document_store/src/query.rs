use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use crate::{CollectionPath, Document, DocumentSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new<F, V>(field: F, op: FilterOp, value: V) -> Self
    where
        F: Into<String>,
        V: Into<Value>,
    {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq<F: Into<String>, V: Into<Value>>(field: F, value: V) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn ne<F: Into<String>, V: Into<Value>>(field: F, value: V) -> Self {
        Self::new(field, FilterOp::Ne, value)
    }

    pub fn lt<F: Into<String>, V: Into<Value>>(field: F, value: V) -> Self {
        Self::new(field, FilterOp::Lt, value)
    }

    pub fn gt<F: Into<String>, V: Into<Value>>(field: F, value: V) -> Self {
        Self::new(field, FilterOp::Gt, value)
    }

    pub fn is_in<F: Into<String>>(field: F, values: Vec<Value>) -> Self {
        Self::new(field, FilterOp::In, Value::Array(values))
    }

    pub fn matches(&self, document: &Document) -> bool {
        let field = lookup(document, &self.field);
        match self.op {
            FilterOp::Eq => field.is_some_and(|value| values_equal(value, &self.value)),
            FilterOp::Ne => !field.is_some_and(|value| values_equal(value, &self.value)),
            FilterOp::In => match (&self.value, field) {
                (Value::Array(candidates), Some(value)) => candidates
                    .iter()
                    .any(|candidate| values_equal(value, candidate)),
                _ => false,
            },
            FilterOp::Lt => ordered(field, &self.value, |o| o == Ordering::Less),
            FilterOp::Le => ordered(field, &self.value, |o| o != Ordering::Greater),
            FilterOp::Gt => ordered(field, &self.value, |o| o == Ordering::Greater),
            FilterOp::Ge => ordered(field, &self.value, |o| o != Ordering::Less),
        }
    }
}

fn ordered<F>(field: Option<&Value>, operand: &Value, accept: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    field
        .and_then(|value| compare_comparable(value, operand))
        .is_some_and(accept)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: vec![],
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by<F: Into<String>>(mut self, field: F, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filters.iter().all(|filter| filter.matches(document))
    }

    /// Filters, orders and limits the given documents of the query's
    /// collection. Without an explicit order documents come in creation order.
    /// Ties are broken by creation order in the requested direction.
    pub fn evaluate<I>(&self, documents: I) -> Vec<DocumentSnapshot>
    where
        I: IntoIterator<Item = DocumentSnapshot>,
    {
        let mut result = documents
            .into_iter()
            .filter(|snapshot| self.matches(&snapshot.data))
            .collect::<Vec<_>>();

        match &self.order_by {
            Some(OrderBy { field, direction }) => result.sort_by(|a, b| {
                let ordering = compare_for_sort(
                    lookup(&a.data, field),
                    lookup(&b.data, field),
                )
                .then(a.create_sequence.cmp(&b.create_sequence));
                match direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            }),
            None => result.sort_by_key(|snapshot| snapshot.create_sequence),
        }

        if let Some(limit) = self.limit {
            result.truncate(limit);
        }
        result
    }
}

/// Resolves a dotted field path like `location.latitude`.
pub fn lookup<'a>(document: &'a Document, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match compare_comparable(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

/// Compares two values of the same kind. Numbers compare numerically,
/// RFC 3339 timestamps chronologically and other strings lexically.
pub fn compare_comparable(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            match (parse_timestamp(a), parse_timestamp(b)) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Total order used for sorting: missing fields first, then by kind, then by
/// value.
fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_comparable(a, b)
            .unwrap_or_else(|| type_rank(Some(a)).cmp(&type_rank(Some(b)))),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn snapshot(id: &str, sequence: u64, value: Value) -> DocumentSnapshot {
        DocumentSnapshot {
            path: CollectionPath::new("units").doc(id),
            data: doc(value),
            version: sequence,
            create_sequence: sequence,
        }
    }

    #[test]
    fn filters_by_equality_and_membership() {
        let unit = doc(json!({ "status": "Available", "capacity": 2 }));
        assert!(Filter::eq("status", "Available").matches(&unit));
        assert!(Filter::eq("capacity", 2.0).matches(&unit));
        assert!(!Filter::eq("status", "EnRoute").matches(&unit));
        assert!(Filter::ne("status", "EnRoute").matches(&unit));
        assert!(Filter::ne("missing", 1).matches(&unit));
        assert!(Filter::is_in("status", vec![json!("EnRoute"), json!("Available")])
            .matches(&unit));
        assert!(!Filter::is_in("missing", vec![json!(1)]).matches(&unit));
    }

    #[test]
    fn range_filters_skip_incomparable_values() {
        let unit = doc(json!({ "responseTime": 10, "plate": "KAA" }));
        assert!(Filter::lt("responseTime", 11).matches(&unit));
        assert!(!Filter::gt("responseTime", 10).matches(&unit));
        assert!(Filter::new("responseTime", FilterOp::Ge, 10).matches(&unit));
        assert!(!Filter::lt("plate", 3).matches(&unit));
    }

    #[test]
    fn nested_lookup() {
        let incident = doc(json!({ "location": { "latitude": -1.283 } }));
        assert_eq!(lookup(&incident, "location.latitude"), Some(&json!(-1.283)));
        assert_eq!(lookup(&incident, "location.altitude"), None);
    }

    #[test]
    fn timestamps_order_chronologically() {
        // lexically ".5Z" sorts before "Z" although it is later
        let a = json!("2024-05-04T09:30:00Z");
        let b = json!("2024-05-04T09:30:00.5Z");
        assert_eq!(compare_comparable(&a, &b), Some(Ordering::Less));
    }

    #[test]
    fn orders_descending_with_stable_ties() {
        let query = Query::new(CollectionPath::new("units"))
            .order_by("createdAt", Direction::Descending);
        let result = query.evaluate(vec![
            snapshot("a", 1, json!({ "createdAt": "2024-05-04T09:30:00Z" })),
            snapshot("b", 2, json!({ "createdAt": "2024-05-04T09:31:00Z" })),
            snapshot("c", 3, json!({ "createdAt": "2024-05-04T09:30:00Z" })),
        ]);
        let ids = result.iter().map(|s| s.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn limit_applies_after_ordering() {
        let query = Query::new(CollectionPath::new("units"))
            .filter(Filter::eq("status", "Available"))
            .order_by("responseTime", Direction::Ascending)
            .limit(1);
        let result = query.evaluate(vec![
            snapshot("slow", 1, json!({ "status": "Available", "responseTime": 30 })),
            snapshot("busy", 2, json!({ "status": "EnRoute", "responseTime": 1 })),
            snapshot("fast", 3, json!({ "status": "Available", "responseTime": 5 })),
        ]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id(), "fast");
    }
}
