//! Commit message rendering.
//!
//! Templates are Tera strings; the context is [`MessageContext`]:
//! `date`, `timestamp`, `overall`, `stages`, `succeeded`, `failed`,
//! and `aborted_stage` (empty unless a fatal stage aborted the cycle).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tera::{Context, Tera};

use lockbox_core::CycleResult;

use crate::error::SyncError;

const TEMPLATE_NAME: &str = "commit_message";

/// Values available to the commit message template.
#[derive(Debug, Clone, Serialize)]
pub struct MessageContext {
    /// Cycle start date, `YYYY-MM-DD` (UTC).
    pub date: String,
    /// Cycle start, RFC 3339.
    pub timestamp: String,
    pub overall: String,
    pub stages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted_stage: String,
}

impl MessageContext {
    pub fn from_cycle(cycle: &CycleResult) -> Self {
        Self {
            date: cycle.started_at.format("%Y-%m-%d").to_string(),
            timestamp: cycle.started_at.to_rfc3339(),
            overall: cycle.overall.to_string(),
            stages: cycle.outcomes.len(),
            succeeded: cycle.succeeded(),
            failed: cycle.failed(),
            aborted_stage: cycle
                .aborted_stage()
                .map(|o| o.stage.name.to_string())
                .unwrap_or_default(),
        }
    }

    fn sample(at: DateTime<Utc>) -> Self {
        Self::from_cycle(&CycleResult::from_outcomes(at, at, Vec::new()))
    }
}

/// A parsed commit message template.
#[derive(Debug, Clone)]
pub struct CommitMessage {
    tera: Tera,
}

impl CommitMessage {
    /// Parse `template` and check that it renders against a sample cycle, so
    /// a bad template fails at startup rather than at the first publish.
    pub fn new(template: &str) -> Result<Self, SyncError> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, template)?;
        let message = Self { tera };
        message.render_context(&MessageContext::sample(Utc::now()))?;
        Ok(message)
    }

    pub fn render(&self, cycle: &CycleResult) -> Result<String, SyncError> {
        self.render_context(&MessageContext::from_cycle(cycle))
    }

    fn render_context(&self, ctx: &MessageContext) -> Result<String, SyncError> {
        let ctx = Context::from_serialize(ctx)?;
        let rendered = self.tera.render(TEMPLATE_NAME, &ctx)?;
        let trimmed = rendered.trim();
        if trimmed.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lockbox_core::config::DEFAULT_COMMIT_TEMPLATE;
    use lockbox_core::{Stage, StageExit, StageOutcome, StagePolicy};

    fn cycle() -> CycleResult {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 6, 0, 0).unwrap();
        let outcome = |name: &str, exit, policy| StageOutcome {
            stage: Stage::new(name, ["true"], policy),
            exit,
            aborted: false,
            duration_ms: 1,
        };
        CycleResult::from_outcomes(
            at,
            at,
            vec![
                outcome("fetch", StageExit::Success, StagePolicy::Fatal),
                outcome("predict", StageExit::Success, StagePolicy::Fatal),
                outcome("settle", StageExit::Failed { code: Some(1) }, StagePolicy::Skip),
            ],
        )
    }

    #[test]
    fn default_template_names_date_and_outcome() {
        let message = CommitMessage::new(DEFAULT_COMMIT_TEMPLATE).unwrap();
        assert_eq!(
            message.render(&cycle()).unwrap(),
            "LockBox cycle 2026-03-14 (partial failure)"
        );
    }

    #[test]
    fn counts_are_available() {
        let message =
            CommitMessage::new("{{ succeeded }}/{{ stages }} ok, {{ failed }} failed").unwrap();
        assert_eq!(message.render(&cycle()).unwrap(), "2/3 ok, 1 failed");
    }

    #[test]
    fn output_is_not_html_escaped() {
        let message = CommitMessage::new("a <b> & {{ date }}").unwrap();
        assert_eq!(message.render(&cycle()).unwrap(), "a <b> & 2026-03-14");
    }

    #[test]
    fn bad_templates_fail_at_construction() {
        assert!(matches!(
            CommitMessage::new("{{ date"),
            Err(SyncError::Template(_))
        ));
        assert!(matches!(
            CommitMessage::new("{{ no_such_field }}"),
            Err(SyncError::Template(_))
        ));
        assert!(matches!(
            CommitMessage::new("   "),
            Err(SyncError::EmptyMessage)
        ));
    }
}
