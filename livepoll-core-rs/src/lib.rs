//! Livepoll Core Library
//!
//! Poll lifecycle and live vote broadcast engine. Polls move through
//! NOT_STARTED → IN_PROGRESS → FINISHED purely as a function of their voting
//! window and the current instant. Structural edits are allowed only before
//! the start, votes only during the window, and every counted vote is pushed
//! to the subscribers of that poll.
//!
//! ```text
//!  request layer ──► PollEngine ──► VoteLedger ──► PollRepository
//!                        │              │
//!                        │              ▼ (counted vote / deleted poll)
//!                        │        EventPipeline
//!                        │              │
//!                        └──────► BroadcastHub ──► Subscribers
//! ```

pub mod types;
pub mod status;
pub mod error;
pub mod repository;
pub mod storage;
pub mod hub;
pub mod ledger;
pub mod pipeline;
pub mod config;
pub mod engine;

pub use types::*;
pub use status::{status, Clock, ManualClock, PollStatus, SystemClock};
pub use error::{Action, ErrorKind, LedgerError, StorageError};
pub use repository::{MemoryRepository, PollRepository};
pub use storage::{FileRepository, StorageConfig};
pub use hub::{BroadcastHub, PublishReport, Subscriber};
pub use ledger::{LedgerObserver, VoteLedger};
pub use pipeline::{EventPipeline, MessageKind, PollHub, PollMessage};
pub use config::{EngineConfig, StorageBackend};
pub use engine::{PollEngine, PollSubscriber};
