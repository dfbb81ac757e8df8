//! # Domain Entities
//!
//! Core entities of the relay and the contracts through which external
//! services are consumed.
//!
//! ## Core Entities
//!
//! - **Message**: an ordered, immutable chat message
//! - **Conversation**: participant set and ordering sequence owner
//! - **Job**: durable unit of background side-effect work
//! - **FanoutEvent**: transient cross-instance message notification
//!
//! ## Contracts
//!
//! Each entity file also defines the trait the infrastructure layer
//! implements (`MessageStore`, `ConversationRepository`, `JobQueue`,
//! `FanoutBus`), following the dependency inversion principle.

mod conversation;
mod fanout;
mod job;
mod message;

pub use conversation::{Conversation, ConversationRepository};
pub use fanout::{DeliverySink, FanoutBus, FanoutEvent};
pub use job::{Job, JobKind, JobQueue, JobStatus, MailSender};
#[cfg(test)]
pub use job::MockMailSender;
pub use message::{DeliveryState, Message, MessageStore};
