//! Plain-structure classification
//!
//! Decides which values the accessors may instrument. Only records and
//! sequences are "plain"; scalars and opaque host payloads pass through
//! untouched.

use crate::value::Value;

/// Runtime shape of a value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Record,
    Sequence,
    Scalar,
}

pub fn classify(value: &Value) -> Shape {
    match value {
        Value::Record(_) => Shape::Record,
        Value::Sequence(_) => Shape::Sequence,
        // Opaque payloads are the escape hatch: always scalar
        Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Opaque(_) => Shape::Scalar,
    }
}

/// Whether the engine is allowed to wrap this value
pub fn is_plain(value: &Value) -> bool {
    classify(value) != Shape::Scalar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Opaque, Record, Sequence};

    #[test]
    fn test_containers_are_plain() {
        assert!(is_plain(&Value::Record(Record::new())));
        assert!(is_plain(&Value::Sequence(Sequence::new())));
    }

    #[test]
    fn test_opaque_is_scalar() {
        let payload = Value::Opaque(Opaque::new(std::time::Duration::from_secs(1)));
        assert_eq!(classify(&payload), Shape::Scalar);
        assert!(!is_plain(&payload));
        assert!(!is_plain(&Value::from("text")));
    }
}
