//! Event pipeline: turns ledger outcomes into hub traffic.
//!
//! Wire format of one update, sent as a WebSocket text frame:
//!
//! ```json
//! {"type":"OPTION_UPDATED","payload":{"id":"…","text":"Rust","votes":42},"timestamp":"2031-03-14T15:00:00Z"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::hub::BroadcastHub;
use crate::ledger::LedgerObserver;
use crate::types::{OptionView, PollId};

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "OPTION_UPDATED")]
    OptionUpdated,
}

/// Update delivered to the subscribers of one poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: OptionView,
    pub timestamp: DateTime<Utc>,
}

impl PollMessage {
    pub fn option_updated(option: OptionView, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: MessageKind::OptionUpdated,
            payload: option,
            timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Hub carrying poll updates, keyed by poll id
pub type PollHub = BroadcastHub<PollId, PollMessage>;

/// [`LedgerObserver`] that publishes every counted vote and closes the topic
/// of a deleted poll
pub struct EventPipeline {
    hub: PollHub,
}

impl EventPipeline {
    pub fn new(hub: PollHub) -> Self {
        Self { hub }
    }
}

impl LedgerObserver for EventPipeline {
    fn option_voted(&self, poll_id: PollId, option: &OptionView, at: DateTime<Utc>) {
        let report = self
            .hub
            .publish(&poll_id, PollMessage::option_updated(option.clone(), at));

        debug!(
            "Pipeline: poll {} option {} → {} votes (delivered {}, detached {})",
            poll_id, option.id, option.votes, report.delivered, report.detached
        );
    }

    fn poll_deleted(&self, poll_id: PollId) {
        let closed = self.hub.close_topic(&poll_id);
        if closed > 0 {
            info!("Pipeline: Closed topic {} ({} subscribers)", poll_id, closed);
        }
    }
}
