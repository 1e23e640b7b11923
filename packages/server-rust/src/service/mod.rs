//! Send pipeline services.
//!
//! 1. **Configuration** (`config`): batch size, retry policy, transport settings
//! 2. **Sessions** (`session`): scoped release of per-batch transport sessions
//! 3. **Dispatch** (`dispatch`): the `send` queue-message handler
//! 4. **Background workers** (`worker`): channel-fed worker and the send runnable

pub mod config;
pub mod dispatch;
pub mod session;
pub mod worker;

pub use config::{DispatchConfig, TransportSettings, DEFAULT_MAX_FILES_PER_SESSION};
pub use dispatch::{DispatchError, SendDispatcher, SendOutcome};
pub use session::SessionGuard;
pub use worker::{BackgroundRunnable, BackgroundWorker, SendWorker, WorkerStats};
