//! Optimistic-locking version values

use crate::errors::{ReposeError, Result};
use crate::model::descriptor::{EntityDescriptor, VersionType};
use crate::model::value::Value;
use chrono::{DateTime, SubsecRound, Utc};

/// Seed the version property of `values` when it is unset. Returns whether
/// `values` was modified.
///
/// Counters start at 0; a negative counter counts as unset. Timestamps start
/// at the current time truncated to milliseconds, the precision the
/// database stores.
pub fn seed_version(values: &mut [Value], descriptor: &EntityDescriptor) -> bool {
    let (Some(index), Some(version_type)) = (descriptor.version_property(), descriptor.version_type())
    else {
        return false;
    };
    let Some(slot) = values.get_mut(index) else {
        return false;
    };
    let unset = match slot {
        Value::Null => true,
        Value::Integer(v) => *v < 0,
        _ => false,
    };
    if unset {
        *slot = initial_version(version_type);
        tracing::trace!(
            entity_name = descriptor.entity_name(),
            version = ?slot,
            "seeded version"
        );
    }
    unset
}

pub fn initial_version(version_type: VersionType) -> Value {
    match version_type {
        VersionType::Counter => Value::Integer(0),
        VersionType::Timestamp => Value::Timestamp(now()),
    }
}

/// The version property of `values`, if the entity is versioned
pub fn get_version(values: &[Value], descriptor: &EntityDescriptor) -> Option<Value> {
    descriptor
        .version_property()
        .and_then(|index| values.get(index).cloned())
}

/// The version that follows `current`
pub fn increment(current: &Value, version_type: VersionType) -> Result<Value> {
    match (version_type, current) {
        (VersionType::Counter, Value::Integer(v)) => v
            .checked_add(1)
            .map(Value::Integer)
            .ok_or_else(|| ReposeError::TypeMismatch {
                attribute: "<version>".to_string(),
                expected: format!("counter below {}", i64::MAX),
                found: "counter at its maximum".to_string(),
            }),
        (VersionType::Counter, Value::Null) => Ok(Value::Integer(0)),
        (VersionType::Timestamp, Value::Timestamp(previous)) => {
            // Never move backwards, even if the clock does
            let next = now().max(*previous + chrono::Duration::milliseconds(1));
            Ok(Value::Timestamp(next))
        }
        (VersionType::Timestamp, Value::Null) => Ok(Value::Timestamp(now())),
        (_, other) => Err(ReposeError::TypeMismatch {
            attribute: "<version>".to_string(),
            expected: format!("{:?}", version_type).to_lowercase(),
            found: other.type_name().to_string(),
        }),
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::descriptor::{AttributeMapping, IdStrategy};
    use crate::model::types::TypeHandler;
    use crate::model::value::IdType;

    fn versioned(version_type: VersionType) -> EntityDescriptor {
        let handler = match version_type {
            VersionType::Counter => TypeHandler::Integer,
            VersionType::Timestamp => TypeHandler::Timestamp,
        };
        EntityDescriptor::builder("Book", "books")
            .id("id", "id", IdType::Long, IdStrategy::Assigned)
            .attribute(AttributeMapping::basic("title", TypeHandler::Text))
            .attribute(AttributeMapping::basic("version", handler))
            .version("version", version_type)
            .build()
            .unwrap()
    }

    #[test]
    fn test_seed_counter() {
        let d = versioned(VersionType::Counter);
        let mut values = vec![Value::from("T"), Value::Null];
        assert!(seed_version(&mut values, &d));
        assert_eq!(values[1], Value::Integer(0));

        let mut negative = vec![Value::from("T"), Value::Integer(-1)];
        assert!(seed_version(&mut negative, &d));
        assert_eq!(negative[1], Value::Integer(0));
    }

    #[test]
    fn test_seed_keeps_existing_version() {
        let d = versioned(VersionType::Counter);
        let mut values = vec![Value::from("T"), Value::Integer(4)];
        assert!(!seed_version(&mut values, &d));
        assert_eq!(values[1], Value::Integer(4));
    }

    #[test]
    fn test_seed_timestamp_has_millisecond_precision() {
        let d = versioned(VersionType::Timestamp);
        let mut values = vec![Value::Null, Value::Null];
        assert!(seed_version(&mut values, &d));
        match &values[1] {
            Value::Timestamp(t) => assert_eq!(t.timestamp_subsec_nanos() % 1_000_000, 0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unversioned_is_untouched() {
        let d = EntityDescriptor::builder("Tag", "tags")
            .id("id", "id", IdType::Long, IdStrategy::Assigned)
            .build()
            .unwrap();
        let mut values = vec![];
        assert!(!seed_version(&mut values, &d));
        assert_eq!(get_version(&values, &d), None);
    }

    #[test]
    fn test_increment() {
        assert_eq!(
            increment(&Value::Integer(1), VersionType::Counter).unwrap(),
            Value::Integer(2)
        );
        let t = now();
        match increment(&Value::Timestamp(t), VersionType::Timestamp).unwrap() {
            Value::Timestamp(next) => assert!(next > t),
            other => panic!("unexpected {:?}", other),
        }
        assert!(increment(&Value::from("x"), VersionType::Counter).is_err());
    }

    #[test]
    fn test_counter_at_maximum_does_not_wrap() {
        let result = increment(&Value::Integer(i64::MAX), VersionType::Counter);
        assert!(matches!(
            result,
            Err(ReposeError::TypeMismatch { ref attribute, .. }) if attribute == "<version>"
        ));
        assert_eq!(
            increment(&Value::Integer(i64::MAX - 1), VersionType::Counter).unwrap(),
            Value::Integer(i64::MAX)
        );
    }
}
