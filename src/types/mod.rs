//! Core shared types.

pub mod usage;

pub use usage::Usage;

/// Conversation identifier; the routing key on the shared connection.
pub type SessionId = String;

/// Identifier of one generation within a session.
pub type GenerationId = String;

/// Fresh generation id.
pub fn new_generation_id() -> GenerationId {
    uuid::Uuid::new_v4().to_string()
}

/// Fresh block id for thinking, content and error blocks.
pub fn new_block_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
