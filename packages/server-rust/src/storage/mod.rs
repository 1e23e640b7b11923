//! In-memory implementations of the send pipeline's collaborators.
//!
//! - [`InMemoryWorkflowStore`]: report tasks with fetch/lock/complete
//! - [`InMemoryEventQueue`]: scheduled queue messages
//! - [`InMemoryActionHistory`]: append-only audit records
//! - [`StaticReceiverCatalog`]: fixed receiver configuration
//!
//! Used by tests and the dry-run binary. Production deployments bind the
//! collaborator traits to their own database and queue.

pub mod catalog;
pub mod history;
pub mod queue;
pub mod workflow;

pub use catalog::StaticReceiverCatalog;
pub use history::InMemoryActionHistory;
pub use queue::InMemoryEventQueue;
pub use workflow::{InMemoryWorkflowStore, TaskState};
