//! Text summary builder for CLI output.
//!
//! Formats the one-line progress status and the final job-log report for text mode.

use crate::model::{Phase, RunStatus, Session};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// One-line description of where the session is.
pub(crate) fn status_line(session: &Session) -> String {
    let run = session.active_run.as_ref();
    let status = run
        .and_then(|r| r.status)
        .map(RunStatus::as_str)
        .unwrap_or("unknown");

    match (session.phase, run) {
        (Phase::Idle, _) => "Idle.".to_string(),
        (Phase::Triggering, _) => "Triggering...".to_string(),
        (Phase::Error, _) => format!(
            "Error: {}",
            session.last_error.as_deref().unwrap_or("unknown error")
        ),
        (_, None) => "No active run.".to_string(),
        (Phase::Polling, Some(r)) if r.status.map_or(true, |s| s == RunStatus::Pending) => {
            format!("Run {} started ({status}). Polling status...", r.id)
        }
        (Phase::Polling, Some(r)) => format!("Run {} status: {status}", r.id),
        (Phase::Aggregating, Some(r)) => format!("Run {} {status}. Collecting job logs...", r.id),
        (Phase::Done, Some(r)) => match r.status {
            Some(RunStatus::Success) if session.artifacts_url.is_some() => {
                format!("Run {} completed successfully! Artifacts ready.", r.id)
            }
            Some(RunStatus::Success) => format!("Run {} completed successfully!", r.id),
            _ => format!("Run {} {status}. Check logs for details.", r.id),
        },
    }
}

/// Final report: outcome, artifacts, then every job's log in listing order.
pub(crate) fn build_text_summary(session: &Session) -> TextSummary {
    let mut lines = vec![status_line(session)];

    if let Some(run) = session.active_run.as_ref() {
        lines.push(format!("Ref: {}", run.git_ref));
        if !run.triggered_at.is_empty() {
            lines.push(format!("Triggered: {}", run.triggered_at));
        }
    }
    if let Some(url) = session.artifacts_url.as_deref() {
        lines.push(format!("Artifacts: {url}"));
    }
    if session.phase == Phase::Done {
        if let Some(err) = session.last_error.as_deref() {
            lines.push(format!("Warning: {err}"));
        }
    }

    for job in &session.jobs {
        lines.push(String::new());
        lines.push(format!("Job: {} (Status: {})", job.name, job.status));
        match (job.log_error.as_deref(), job.log.is_empty()) {
            (Some(err), _) => lines.push(err.to_string()),
            (None, true) => lines.push("No log content available.".to_string()),
            (None, false) => lines.extend(job.log.lines().map(str::to_string)),
        }
    }

    TextSummary { lines }
}
