//! Repository interface consumed by the ledger, plus the in-memory implementation.
//!
//! Implementations must offer read-your-writes consistency: a value written
//! through any method is visible to every later read.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::StorageError;
use crate::types::{OptionId, Poll, PollId, PollOption};

/// Durable storage for polls and their options
pub trait PollRepository: Send + Sync {
    /// Load a poll with all of its options
    fn load_poll(&self, id: PollId) -> Result<Option<Poll>, StorageError>;

    /// Load one option of a poll
    fn load_option(&self, poll_id: PollId, option_id: OptionId)
        -> Result<Option<PollOption>, StorageError>;

    /// Insert or replace a poll and its full option list
    fn save_poll(&self, poll: &Poll) -> Result<(), StorageError>;

    /// Write the vote count of a single option. Returns `false` if the option
    /// (or its poll) no longer exists.
    fn store_votes(&self, poll_id: PollId, option_id: OptionId, votes: u64)
        -> Result<bool, StorageError>;

    /// Remove a poll and its options. Returns `false` if it did not exist.
    fn delete_poll(&self, id: PollId) -> Result<bool, StorageError>;

    /// All stored polls, in no particular order
    fn list_polls(&self) -> Result<Vec<Poll>, StorageError>;
}

/// In-memory repository
#[derive(Debug, Default)]
pub struct MemoryRepository {
    polls: RwLock<HashMap<PollId, Poll>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_polls(polls: HashMap<PollId, Poll>) -> Self {
        Self {
            polls: RwLock::new(polls),
        }
    }

    pub(crate) fn snapshot(&self) -> HashMap<PollId, Poll> {
        self.polls.read().clone()
    }

    pub fn len(&self) -> usize {
        self.polls.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.polls.read().is_empty()
    }

    pub(crate) fn put(&self, poll: Poll) {
        self.polls.write().insert(poll.id, poll);
    }

    pub(crate) fn set_votes(&self, poll_id: PollId, option_id: OptionId, votes: u64) -> bool {
        let mut polls = self.polls.write();
        match polls
            .get_mut(&poll_id)
            .and_then(|p| p.options.iter_mut().find(|o| o.id == option_id))
        {
            Some(option) => {
                option.votes = votes;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&self, id: PollId) -> bool {
        self.polls.write().remove(&id).is_some()
    }
}

impl PollRepository for MemoryRepository {
    fn load_poll(&self, id: PollId) -> Result<Option<Poll>, StorageError> {
        Ok(self.polls.read().get(&id).cloned())
    }

    fn load_option(
        &self,
        poll_id: PollId,
        option_id: OptionId,
    ) -> Result<Option<PollOption>, StorageError> {
        Ok(self
            .polls
            .read()
            .get(&poll_id)
            .and_then(|p| p.option(option_id).cloned()))
    }

    fn save_poll(&self, poll: &Poll) -> Result<(), StorageError> {
        self.put(poll.clone());
        Ok(())
    }

    fn store_votes(
        &self,
        poll_id: PollId,
        option_id: OptionId,
        votes: u64,
    ) -> Result<bool, StorageError> {
        Ok(self.set_votes(poll_id, option_id, votes))
    }

    fn delete_poll(&self, id: PollId) -> Result<bool, StorageError> {
        Ok(self.remove(id))
    }

    fn list_polls(&self) -> Result<Vec<Poll>, StorageError> {
        Ok(self.polls.read().values().cloned().collect())
    }
}
