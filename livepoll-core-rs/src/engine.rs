//! Poll engine: ledger, hub and pipeline wired together.
//!
//! This is the surface the request layer talks to. Every mutation goes
//! through the [`VoteLedger`]; counted votes and deletions reach subscribers
//! through the [`EventPipeline`] installed as the ledger's observer.

use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::config::{EngineConfig, StorageBackend};
use crate::error::LedgerError;
use crate::hub::Subscriber;
use crate::ledger::VoteLedger;
use crate::pipeline::{EventPipeline, PollHub, PollMessage};
use crate::repository::{MemoryRepository, PollRepository};
use crate::status::{Clock, PollStatus, SystemClock};
use crate::storage::FileRepository;
use crate::types::{NewPoll, OptionId, OptionView, PollEdit, PollId, PollView};

/// Live update stream for one poll
pub type PollSubscriber = Subscriber<PollId, PollMessage>;

pub struct PollEngine {
    ledger: VoteLedger,
    hub: PollHub,
}

impl PollEngine {
    pub fn new(repo: Arc<dyn PollRepository>, clock: Arc<dyn Clock>, subscriber_buffer: usize) -> Self {
        let hub = PollHub::new(subscriber_buffer);
        let pipeline = Arc::new(EventPipeline::new(hub.clone()));
        let ledger = VoteLedger::new(repo, clock).with_observer(pipeline);

        Self { ledger, hub }
    }

    /// Build an engine on the wall clock with the repository named by `config`
    pub fn open(config: EngineConfig) -> Result<Self, LedgerError> {
        let repo: Arc<dyn PollRepository> = match config.storage {
            StorageBackend::Memory => {
                info!("Engine: Using in-memory storage");
                Arc::new(MemoryRepository::new())
            }
            StorageBackend::File(storage) => {
                info!("Engine: Using file storage at {:?}", storage.dir);
                Arc::new(FileRepository::open(storage)?)
            }
        };

        Ok(Self::new(repo, Arc::new(SystemClock::new()), config.subscriber_buffer))
    }

    pub fn hub(&self) -> &PollHub {
        &self.hub
    }

    pub fn create_poll(&self, request: NewPoll) -> Result<PollView, LedgerError> {
        self.ledger.create_poll(request)
    }

    /// Create a poll opening `starts_in` from now, read once from the engine clock
    pub fn schedule_poll(
        &self,
        question: impl Into<String>,
        starts_in: Duration,
        duration: Duration,
        options: Vec<String>,
    ) -> Result<PollView, LedgerError> {
        self.ledger.schedule_poll(question, starts_in, duration, options)
    }

    pub fn get_poll(&self, poll_id: PollId) -> Result<PollView, LedgerError> {
        self.ledger.get_poll(poll_id)
    }

    pub fn status_of(&self, poll_id: PollId) -> Result<PollStatus, LedgerError> {
        self.ledger.status_of(poll_id)
    }

    pub fn list_polls(&self, filter: Option<PollStatus>) -> Result<Vec<PollView>, LedgerError> {
        self.ledger.list_polls(filter)
    }

    pub fn edit_poll(&self, poll_id: PollId, edit: PollEdit) -> Result<PollView, LedgerError> {
        self.ledger.edit_poll(poll_id, edit)
    }

    pub fn reschedule_poll(
        &self,
        poll_id: PollId,
        starts_in: Duration,
        duration: Duration,
    ) -> Result<PollView, LedgerError> {
        self.ledger.reschedule_poll(poll_id, starts_in, duration)
    }

    pub fn add_option(&self, poll_id: PollId, text: &str) -> Result<OptionView, LedgerError> {
        self.ledger.add_option(poll_id, text)
    }

    pub fn remove_option(&self, poll_id: PollId, option_id: OptionId) -> Result<(), LedgerError> {
        self.ledger.remove_option(poll_id, option_id)
    }

    pub fn cast_vote(&self, poll_id: PollId, option_id: OptionId) -> Result<OptionView, LedgerError> {
        self.ledger.cast_vote(poll_id, option_id)
    }

    pub fn delete_poll(&self, poll_id: PollId) -> Result<(), LedgerError> {
        self.ledger.delete_poll(poll_id)
    }

    /// Follow the live updates of an existing poll
    pub fn subscribe(&self, poll_id: PollId) -> Result<PollSubscriber, LedgerError> {
        // Register before the existence check so a concurrent delete closes us
        let subscriber = self.hub.subscribe(poll_id);
        self.ledger.status_of(poll_id)?;
        Ok(subscriber)
    }
}
