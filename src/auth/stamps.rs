use uuid::Uuid;

/// Source of generated values (identifiers, security and concurrency stamps)
/// that the write layer fills in when a record reaches the store.
pub trait ValueGenerator: Send + Sync {
    fn next_value(&self) -> String;
}

/// Random v4 UUIDs in their hyphenated form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl ValueGenerator for UuidGenerator {
    fn next_value(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
