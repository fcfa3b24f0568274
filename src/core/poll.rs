use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::BotError;

/// A single yes/no style poll to send. Always carries exactly two options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollJob {
    pub name: String,
    pub options: [String; 2],
    pub allow_multiple_answers: bool,
    pub is_test: bool,
}

impl PollJob {
    pub fn new(
        name: &str,
        options: &[String],
        allow_multiple_answers: bool,
        is_test: bool,
    ) -> Result<Self, BotError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BotError::InvalidPoll("poll name is empty".to_string()));
        }
        let [first, second] = options else {
            return Err(BotError::InvalidPoll(format!(
                "a poll needs exactly 2 options, got {}",
                options.len()
            )));
        };
        let first = first.trim();
        let second = second.trim();
        if first.is_empty() || second.is_empty() {
            return Err(BotError::InvalidPoll("poll options must not be empty".to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            options: [first.to_string(), second.to_string()],
            allow_multiple_answers,
            is_test,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Sent { sent_at: DateTime<Utc> },
    NotReady { state: String },
    Busy,
    Failed { error: String },
}

/// Result of one dispatch attempt. Reported once, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    #[serde(flatten)]
    pub status: DispatchStatus,
    pub poll_name: String,
    pub is_test: bool,
    pub duration_ms: u64,
}

impl DispatchOutcome {
    pub fn success(&self) -> bool {
        matches!(self.status, DispatchStatus::Sent { .. })
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            DispatchStatus::Sent { sent_at } => Some(sent_at),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            DispatchStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(a: &str, b: &str) -> Vec<String> {
        vec![a.to_string(), b.to_string()]
    }

    #[test]
    fn new_trims_name_and_options() {
        let poll = PollJob::new("  Meet availability ", &opts(" Yes", "No "), false, false).unwrap();
        assert_eq!(poll.name, "Meet availability");
        assert_eq!(poll.options, ["Yes".to_string(), "No".to_string()]);
    }

    #[test]
    fn new_rejects_wrong_option_count() {
        let three = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(matches!(
            PollJob::new("q", &three, false, false),
            Err(BotError::InvalidPoll(_))
        ));
        assert!(PollJob::new("q", &["only".to_string()], false, false).is_err());
        assert!(PollJob::new("q", &[], false, false).is_err());
    }

    #[test]
    fn new_rejects_blank_name_or_option() {
        assert!(PollJob::new("   ", &opts("Yes", "No"), false, false).is_err());
        assert!(PollJob::new("q", &opts("Yes", "  "), false, false).is_err());
    }

    #[test]
    fn outcome_serializes_flat_status() {
        let outcome = DispatchOutcome {
            status: DispatchStatus::NotReady {
                state: "loading".to_string(),
            },
            poll_name: "q".to_string(),
            is_test: true,
            duration_ms: 0,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "not_ready");
        assert_eq!(json["state"], "loading");
        assert_eq!(json["is_test"], true);
        assert!(!outcome.success());
    }
}
