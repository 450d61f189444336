//! Vote ledger: lifecycle-gated mutations and atomic vote accounting.
//!
//! Every operation reads the clock once and derives the poll status from
//! that single instant. Locking is per poll ("gate"):
//!
//! - structural changes (add/remove option, edit, delete) hold the gate's
//!   structure lock exclusively, so the status check and the write cannot
//!   interleave with any other mutation of the same poll;
//! - votes hold the structure lock shared and then the exclusive section of
//!   the one option they touch, so votes on different options run in
//!   parallel while votes on the same option serialise.
//!
//! The observer is called inside the option's exclusive section, which makes
//! the order of published updates match the order votes were counted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Action, LedgerError};
use crate::repository::PollRepository;
use crate::status::{Clock, PollStatus};
use crate::types::{
    NewPoll, OptionId, OptionView, Poll, PollEdit, PollId, PollOption, PollView, PollWindow,
    MAX_QUESTION_CHARS, MIN_OPTIONS,
};

/// Receives successful ledger outcomes
pub trait LedgerObserver: Send + Sync {
    /// A vote was counted; `option` carries the new total
    fn option_voted(&self, poll_id: PollId, option: &OptionView, at: DateTime<Utc>);

    /// A poll and its options were deleted
    fn poll_deleted(&self, poll_id: PollId);
}

/// Per-poll locks
#[derive(Default)]
struct Gate {
    structure: RwLock<()>,
    options: Mutex<HashMap<OptionId, Arc<Mutex<()>>>>,
}

impl Gate {
    fn option_lock(&self, option_id: OptionId) -> Arc<Mutex<()>> {
        self.options.lock().entry(option_id).or_default().clone()
    }
}

/// Lifecycle-aware ledger over a [`PollRepository`]
pub struct VoteLedger {
    repo: Arc<dyn PollRepository>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn LedgerObserver>>,
    gates: Mutex<HashMap<PollId, Arc<Gate>>>,
}

impl VoteLedger {
    pub fn new(repo: Arc<dyn PollRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            observer: None,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the observer notified of counted votes and deleted polls
    pub fn with_observer(mut self, observer: Arc<dyn LedgerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Gate of an existing poll. Unknown ids never get a gate; the existence
    /// check runs under the map lock so a concurrent delete cannot leave one behind.
    fn gate(&self, poll_id: PollId) -> Result<Arc<Gate>, LedgerError> {
        let mut gates = self.gates.lock();
        if let Some(gate) = gates.get(&poll_id) {
            return Ok(gate.clone());
        }
        if self.repo.load_poll(poll_id)?.is_none() {
            return Err(LedgerError::PollNotFound(poll_id));
        }
        Ok(gates.entry(poll_id).or_default().clone())
    }

    fn load(&self, poll_id: PollId) -> Result<Poll, LedgerError> {
        self.repo
            .load_poll(poll_id)?
            .ok_or(LedgerError::PollNotFound(poll_id))
    }

    fn require(
        poll: &Poll,
        now: DateTime<Utc>,
        action: Action,
        required: PollStatus,
    ) -> Result<(), LedgerError> {
        let status = poll.status(now);
        if status == required {
            Ok(())
        } else {
            Err(LedgerError::InvalidState { action, status })
        }
    }

    /// Create a poll from a question, a window and at least three option texts.
    /// The window may not start in the past.
    pub fn create_poll(&self, request: NewPoll) -> Result<PollView, LedgerError> {
        self.create_at(self.clock.now(), request)
    }

    /// Create a poll opening `starts_in` from now and lasting `duration`,
    /// measured against the ledger's own clock reading
    pub fn schedule_poll(
        &self,
        question: impl Into<String>,
        starts_in: Duration,
        duration: Duration,
        options: Vec<String>,
    ) -> Result<PollView, LedgerError> {
        let now = self.clock.now();
        let window = relative_window(now, starts_in, duration)?;
        self.create_at(
            now,
            NewPoll::new(question, window.starts_at, window.ends_at, options),
        )
    }

    fn create_at(&self, now: DateTime<Utc>, request: NewPoll) -> Result<PollView, LedgerError> {
        let question = validate_question(&request.question)?;
        let window = validate_window(request.starts_at, request.ends_at, now)?;
        if request.options.len() < MIN_OPTIONS {
            return Err(LedgerError::Validation(format!(
                "a poll needs at least {} options, got {}",
                MIN_OPTIONS,
                request.options.len()
            )));
        }
        let options = request
            .options
            .iter()
            .map(|text| validate_option_text(text).map(PollOption::new))
            .collect::<Result<Vec<_>, _>>()?;

        let poll = Poll {
            id: uuid::Uuid::new_v4(),
            question,
            window,
            options,
        };
        self.repo.save_poll(&poll)?;

        info!(
            "Ledger: Created poll {} with {} options ({} → {})",
            poll.id,
            poll.options.len(),
            poll.window.starts_at,
            poll.window.ends_at
        );
        Ok(poll.view(now))
    }

    /// Current view of a poll with its derived status
    pub fn get_poll(&self, poll_id: PollId) -> Result<PollView, LedgerError> {
        let now = self.clock.now();
        Ok(self.load(poll_id)?.view(now))
    }

    /// Read-only status query
    pub fn status_of(&self, poll_id: PollId) -> Result<PollStatus, LedgerError> {
        let now = self.clock.now();
        Ok(self.load(poll_id)?.status(now))
    }

    /// All polls, newest start first, optionally restricted to one status
    pub fn list_polls(&self, filter: Option<PollStatus>) -> Result<Vec<PollView>, LedgerError> {
        let now = self.clock.now();

        let mut polls: Vec<PollView> = self
            .repo
            .list_polls()?
            .iter()
            .map(|p| p.view(now))
            .filter(|v| filter.map_or(true, |s| v.status == s))
            .collect();
        polls.sort_by(|a, b| b.starts_at.cmp(&a.starts_at).then(a.id.cmp(&b.id)));

        Ok(polls)
    }

    /// Change question and/or window of a poll that has not started
    pub fn edit_poll(&self, poll_id: PollId, edit: PollEdit) -> Result<PollView, LedgerError> {
        self.edit_at(poll_id, |_| Ok(edit))
    }

    /// Move a poll that has not started to open `starts_in` from now for `duration`
    pub fn reschedule_poll(
        &self,
        poll_id: PollId,
        starts_in: Duration,
        duration: Duration,
    ) -> Result<PollView, LedgerError> {
        self.edit_at(poll_id, |now| {
            let window = relative_window(now, starts_in, duration)?;
            Ok(PollEdit::default().window(window.starts_at, window.ends_at))
        })
    }

    /// Apply the edit built from the instant the status was checked at
    fn edit_at(
        &self,
        poll_id: PollId,
        build: impl FnOnce(DateTime<Utc>) -> Result<PollEdit, LedgerError>,
    ) -> Result<PollView, LedgerError> {
        let gate = self.gate(poll_id)?;
        let _structure = gate.structure.write();
        let now = self.clock.now();

        let mut poll = self.load(poll_id)?;
        Self::require(&poll, now, Action::EditPoll, PollStatus::NotStarted)?;

        let edit = build(now)?;
        if let Some(question) = edit.question {
            poll.question = validate_question(&question)?;
        }
        poll.window = validate_window(
            edit.starts_at.unwrap_or(poll.window.starts_at),
            edit.ends_at.unwrap_or(poll.window.ends_at),
            now,
        )?;

        self.repo.save_poll(&poll)?;
        info!("Ledger: Edited poll {}", poll_id);
        Ok(poll.view(now))
    }

    /// Append an option to a poll that has not started
    pub fn add_option(&self, poll_id: PollId, text: &str) -> Result<OptionView, LedgerError> {
        let gate = self.gate(poll_id)?;
        let _structure = gate.structure.write();
        let now = self.clock.now();

        let mut poll = self.load(poll_id)?;
        Self::require(&poll, now, Action::AddOption, PollStatus::NotStarted)?;

        let option = PollOption::new(validate_option_text(text)?);
        let view = option.view();
        poll.options.push(option);
        self.repo.save_poll(&poll)?;

        debug!("Ledger: Added option {} to poll {}", view.id, poll_id);
        Ok(view)
    }

    /// Remove an option from a poll that has not started, keeping at least
    /// [`MIN_OPTIONS`]
    pub fn remove_option(&self, poll_id: PollId, option_id: OptionId) -> Result<(), LedgerError> {
        let gate = self.gate(poll_id)?;
        let _structure = gate.structure.write();
        let now = self.clock.now();

        let mut poll = self.load(poll_id)?;
        Self::require(&poll, now, Action::RemoveOption, PollStatus::NotStarted)?;

        if poll.options.len() <= MIN_OPTIONS {
            return Err(LedgerError::OptionCountFloor {
                count: poll.options.len(),
            });
        }
        let index = poll
            .options
            .iter()
            .position(|o| o.id == option_id)
            .ok_or(LedgerError::OptionNotFound {
                poll: poll_id,
                option: option_id,
            })?;

        poll.options.remove(index);
        self.repo.save_poll(&poll)?;
        gate.options.lock().remove(&option_id);

        debug!("Ledger: Removed option {} from poll {}", option_id, poll_id);
        Ok(())
    }

    /// Count one vote for an option of a poll in progress
    pub fn cast_vote(&self, poll_id: PollId, option_id: OptionId) -> Result<OptionView, LedgerError> {
        let gate = self.gate(poll_id)?;
        let _structure = gate.structure.read();
        let now = self.clock.now();

        let poll = self.load(poll_id)?;
        Self::require(&poll, now, Action::CastVote, PollStatus::InProgress)?;

        let not_found = || LedgerError::OptionNotFound {
            poll: poll_id,
            option: option_id,
        };
        if poll.option(option_id).is_none() {
            return Err(not_found());
        }

        let option_lock = gate.option_lock(option_id);
        let _section = option_lock.lock();

        let current = self.repo.load_option(poll_id, option_id)?.ok_or_else(not_found)?;
        let votes = current.votes.saturating_add(1);
        if !self.repo.store_votes(poll_id, option_id, votes)? {
            return Err(not_found());
        }

        let view = OptionView {
            id: current.id,
            text: current.text,
            votes,
        };
        debug!("Ledger: Vote for {} in poll {} (now {})", option_id, poll_id, votes);

        if let Some(observer) = &self.observer {
            observer.option_voted(poll_id, &view, now);
        }
        Ok(view)
    }

    /// Delete a poll in any status, together with its options
    pub fn delete_poll(&self, poll_id: PollId) -> Result<(), LedgerError> {
        let gate = self.gate(poll_id)?;
        {
            let _structure = gate.structure.write();
            if !self.repo.delete_poll(poll_id)? {
                return Err(LedgerError::PollNotFound(poll_id));
            }
            self.gates.lock().remove(&poll_id);
        }

        info!("Ledger: Deleted poll {}", poll_id);
        if let Some(observer) = &self.observer {
            observer.poll_deleted(poll_id);
        }
        Ok(())
    }
}

fn validate_question(question: &str) -> Result<String, LedgerError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(LedgerError::Validation("the question cannot be blank".into()));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(LedgerError::Validation(format!(
            "the question cannot be longer than {} characters",
            MAX_QUESTION_CHARS
        )));
    }
    Ok(question.to_string())
}

fn validate_option_text(text: &str) -> Result<String, LedgerError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(LedgerError::Validation("an option cannot be blank".into()));
    }
    Ok(text.to_string())
}

/// A usable window ends after it starts and does not start before `now`
fn validate_window(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<PollWindow, LedgerError> {
    if starts_at < now {
        return Err(LedgerError::Validation(
            "the start date cannot be in the past".into(),
        ));
    }
    let window = PollWindow::new(starts_at, ends_at);
    if !window.is_valid() {
        return Err(LedgerError::Validation(
            "the end date must be after the start date".into(),
        ));
    }
    Ok(window)
}

fn relative_window(
    now: DateTime<Utc>,
    starts_in: Duration,
    duration: Duration,
) -> Result<PollWindow, LedgerError> {
    let out_of_range = || LedgerError::Validation("the schedule is out of range".into());
    let starts_at = now.checked_add_signed(starts_in).ok_or_else(out_of_range)?;
    let ends_at = starts_at.checked_add_signed(duration).ok_or_else(out_of_range)?;
    Ok(PollWindow::new(starts_at, ends_at))
}
