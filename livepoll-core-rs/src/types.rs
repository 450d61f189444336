//! Core types for polls and their options

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{status, PollStatus};

/// Unique identifier for a poll (also its broadcast topic)
pub type PollId = Uuid;

/// Unique identifier for an option within a poll
pub type OptionId = Uuid;

/// Minimum number of options a poll carries after creation
pub const MIN_OPTIONS: usize = 3;

/// Maximum question length in characters
pub const MAX_QUESTION_CHARS: usize = 2000;

/// Half-open voting window `[starts_at, ends_at)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl PollWindow {
    pub fn new(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        Self { starts_at, ends_at }
    }

    /// A window is usable only when it ends strictly after it starts
    pub fn is_valid(&self) -> bool {
        self.ends_at > self.starts_at
    }
}

/// One selectable choice within a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: OptionId,
    pub text: String,
    pub votes: u64,
}

impl PollOption {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            votes: 0,
        }
    }

    pub fn view(&self) -> OptionView {
        OptionView {
            id: self.id,
            text: self.text.clone(),
            votes: self.votes,
        }
    }
}

/// Stored poll record. Status is never stored, see [`Poll::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub window: PollWindow,
    pub options: Vec<PollOption>,
}

impl Poll {
    pub fn status(&self, now: DateTime<Utc>) -> PollStatus {
        status(&self.window, now)
    }

    pub fn option(&self, option_id: OptionId) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    /// Snapshot for callers, with status derived at `now`
    pub fn view(&self, now: DateTime<Utc>) -> PollView {
        PollView {
            id: self.id,
            question: self.question.clone(),
            status: self.status(now),
            starts_at: self.window.starts_at,
            ends_at: self.window.ends_at,
            options: self.options.iter().map(PollOption::view).collect(),
        }
    }
}

/// Request to create a poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPoll {
    pub question: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub options: Vec<String>,
}

impl NewPoll {
    pub fn new(
        question: impl Into<String>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            question: question.into(),
            starts_at,
            ends_at,
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

/// Partial update of a poll that has not started yet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollEdit {
    pub question: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl PollEdit {
    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    pub fn window(mut self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        self.starts_at = Some(starts_at);
        self.ends_at = Some(ends_at);
        self
    }
}

/// Option snapshot handed to callers and subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionView {
    pub id: OptionId,
    pub text: String,
    pub votes: u64,
}

/// Poll snapshot with its derived status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub id: PollId,
    pub question: String,
    pub status: PollStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub options: Vec<OptionView>,
}

impl PollView {
    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample_poll() -> Poll {
        let start = Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap();
        Poll {
            id: Uuid::new_v4(),
            question: "Best editor?".to_string(),
            window: PollWindow::new(start, start + Duration::hours(1)),
            options: vec![
                PollOption::new("vim"),
                PollOption::new("emacs"),
                PollOption::new("helix"),
            ],
        }
    }

    #[test]
    fn test_window_validity() {
        let t = Utc::now();
        assert!(PollWindow::new(t, t + Duration::seconds(1)).is_valid());
        assert!(!PollWindow::new(t, t).is_valid());
        assert!(!PollWindow::new(t, t - Duration::seconds(1)).is_valid());
    }

    #[test]
    fn test_view_derives_status_and_keeps_order() {
        let poll = sample_poll();
        let before = poll.window.starts_at - Duration::minutes(1);

        let view = poll.view(before);
        assert_eq!(view.status, PollStatus::NotStarted);
        let texts: Vec<_> = view.options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["vim", "emacs", "helix"]);
        assert_eq!(view.total_votes(), 0);

        let during = poll.view(poll.window.starts_at);
        assert_eq!(during.status, PollStatus::InProgress);
    }

    #[test]
    fn test_poll_view_serialization() {
        let poll = sample_poll();
        let json = serde_json::to_value(poll.view(poll.window.ends_at)).unwrap();

        assert_eq!(json["status"], "FINISHED");
        assert!(json.get("startsAt").is_some());
        assert_eq!(json["options"][0]["votes"], 0);
    }
}
