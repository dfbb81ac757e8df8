//! Repository Implementations
//!
//! PostgreSQL implementations of the domain contracts.
//!
//! - **PgMessageStore** - atomic sequence allocation + persistence,
//!   cursor fetch for reconciliation
//! - **PgConversationRepository** - participant authority (read-only)

pub mod conversation_repository;
pub mod message_store;

pub use conversation_repository::PgConversationRepository;
pub use message_store::PgMessageStore;
