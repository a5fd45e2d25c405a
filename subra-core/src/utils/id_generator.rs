use base58::ToBase58;
use subra_common::prelude::*;
use uuid::Uuid;

/// Default id scheme for message exchanges and scheduled jobs: UUID v4,
/// base58-encoded to stay compact in logs and persisted keys. Instance-local
/// ids (channels, closures) come from the soup's own counter instead.
pub struct IdGenerator;

impl IdGenerator {
    pub fn generate() -> InlineStr {
        Uuid::new_v4().as_bytes().to_base58().into()
    }
}
