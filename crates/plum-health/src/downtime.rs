//! Downtime accounting
//!
//! A downtime event is an interval record opened when a plugin becomes
//! unhealthy and closed when it returns to healthy. At most one event per
//! plugin is unresolved at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Breadth of a downtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DowntimeImpact {
    /// Some probes still passed during the event.
    Partial,
    /// Every probe failed at the event's worst point.
    Total,
}

impl std::fmt::Display for DowntimeImpact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DowntimeImpact::Partial => write!(f, "partial"),
            DowntimeImpact::Total => write!(f, "total"),
        }
    }
}

/// One downtime interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowntimeEvent {
    /// When the plugin became unhealthy.
    pub started_at: DateTime<Utc>,

    /// When the plugin returned to healthy, once resolved.
    pub ended_at: Option<DateTime<Utc>>,

    /// Why the event opened (the first failing probe's message).
    pub reason: String,

    /// Breadth, finalized at close.
    pub impact: DowntimeImpact,

    /// Whether the interval has closed.
    pub resolved: bool,

    /// Most probes seen failing concurrently during the event.
    pub peak_failing: usize,
}

impl DowntimeEvent {
    /// Duration of a resolved event.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Per-plugin downtime ledger
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DowntimeLog {
    events: Vec<DowntimeEvent>,
}

impl DowntimeLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Rebuild a ledger from existing events (snapshots, tests).
    pub fn from_events(events: Vec<DowntimeEvent>) -> Self {
        Self { events }
    }

    /// The unresolved event, if one is open.
    pub fn open_event(&self) -> Option<&DowntimeEvent> {
        self.events.iter().find(|e| !e.resolved)
    }

    /// All events, oldest first.
    pub fn events(&self) -> &[DowntimeEvent] {
        &self.events
    }

    /// Open a new event. A no-op if one is already open, preserving the
    /// at-most-one-unresolved invariant.
    pub fn open(&mut self, reason: impl Into<String>, failing: usize) {
        if self.open_event().is_some() {
            return;
        }
        self.events.push(DowntimeEvent {
            started_at: Utc::now(),
            ended_at: None,
            reason: reason.into(),
            impact: DowntimeImpact::Partial,
            resolved: false,
            peak_failing: failing,
        });
    }

    /// Track the failing-probe count while an event is open.
    pub fn observe_failing(&mut self, failing: usize) {
        if let Some(event) = self.events.iter_mut().find(|e| !e.resolved) {
            event.peak_failing = event.peak_failing.max(failing);
        }
    }

    /// Close the open event, finalizing its impact: `Total` when every
    /// probe was failing at the event's worst point, else `Partial`.
    /// Returns the closed event.
    pub fn close(&mut self, total_probes: usize) -> Option<DowntimeEvent> {
        let event = self.events.iter_mut().find(|e| !e.resolved)?;
        event.ended_at = Some(Utc::now());
        event.resolved = true;
        event.impact = if total_probes > 0 && event.peak_failing >= total_probes {
            DowntimeImpact::Total
        } else {
            DowntimeImpact::Partial
        };
        Some(event.clone())
    }

    /// Total downtime overlapping the window `[from, to]`.
    pub fn downtime_within(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> chrono::Duration {
        let mut total = chrono::Duration::zero();
        for event in &self.events {
            let start = event.started_at.max(from);
            let end = event.ended_at.unwrap_or(to).min(to);
            if end > start {
                total = total + (end - start);
            }
        }
        total
    }

    /// Drop resolved events that ended before `cutoff`.
    pub fn trim(&mut self, cutoff: DateTime<Utc>) {
        self.events
            .retain(|e| !e.resolved || e.ended_at.map(|end| end >= cutoff).unwrap_or(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_most_one_open_event() {
        let mut log = DowntimeLog::new();

        log.open("probe http failed", 1);
        log.open("probe tcp failed", 2);

        assert_eq!(log.events().len(), 1);
        assert!(log.open_event().is_some());
    }

    #[test]
    fn test_close_records_total_impact() {
        let mut log = DowntimeLog::new();

        log.open("all probes failing", 1);
        log.observe_failing(3);
        let closed = log.close(3).unwrap();

        assert!(closed.resolved);
        assert_eq!(closed.impact, DowntimeImpact::Total);
        assert!(closed.duration().is_some());
        assert!(log.open_event().is_none());
    }

    #[test]
    fn test_close_records_partial_impact() {
        let mut log = DowntimeLog::new();

        log.open("one probe failing", 1);
        let closed = log.close(3).unwrap();

        assert_eq!(closed.impact, DowntimeImpact::Partial);
    }

    #[test]
    fn test_downtime_within_counts_open_events() {
        let mut log = DowntimeLog::new();
        log.open("down", 1);

        let now = Utc::now();
        let window_start = now - chrono::Duration::hours(1);
        let downtime = log.downtime_within(window_start, now);

        // Open event accrues downtime up to the window's end.
        assert!(downtime > chrono::Duration::zero());
        assert!(downtime <= chrono::Duration::hours(1));
    }
}
