//! Property-based test generators using proptest.

use offlink_protocol::{CacheKey, Operation, Tag};
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Tags known to the fixture tag maps, plus one nobody maps.
pub const KNOWN_TAGS: [&str; 6] = [
    "user:me",
    "user:profiles",
    "user:list",
    "auth:me",
    "auth:session",
    "unmapped:tag",
];

/// Any registered operation.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop::sample::select(Operation::ALL.to_vec())
}

/// Operations that are queued while offline.
pub fn write_operation_strategy() -> impl Strategy<Value = Operation> {
    prop::sample::select(vec![Operation::UserUpdateProfile, Operation::UserUploadAvatar])
}

/// Small flat JSON objects.
pub fn variables_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
        ],
        0..4,
    )
    .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>()))
}

/// Zero to three tags drawn from [`KNOWN_TAGS`].
pub fn tags_strategy() -> impl Strategy<Value = Option<Vec<Tag>>> {
    prop::collection::vec(prop::sample::select(KNOWN_TAGS.to_vec()), 0..3).prop_map(|tags| {
        if tags.is_empty() {
            None
        } else {
            Some(tags.into_iter().map(Tag::from).collect())
        }
    })
}

/// One queued write: operation, variables and tags.
pub fn mutation_strategy() -> impl Strategy<Value = (Operation, Value, Option<Vec<Tag>>)> {
    (write_operation_strategy(), variables_strategy(), tags_strategy())
}

/// Up to `max` queued writes.
pub fn mutation_batch_strategy(
    max: usize,
) -> impl Strategy<Value = Vec<(Operation, Value, Option<Vec<Tag>>)>> {
    prop::collection::vec(mutation_strategy(), 0..=max)
}

/// Cache keys of one to four string or integer parts.
pub fn cache_key_strategy() -> impl Strategy<Value = CacheKey> {
    prop::collection::vec(
        prop_oneof![
            "[a-z]{1,6}".prop_map(Value::from),
            (0u32..100).prop_map(Value::from),
        ],
        1..4,
    )
    .prop_map(CacheKey::new)
}
