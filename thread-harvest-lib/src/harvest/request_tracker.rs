//! Progress accounting for harvested threads and outstanding API requests.

use super::progress::Progress;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use owo_colors::OwoColorize;
use std::sync::Arc;

/// Topics that can be tracked for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrackedTopic {
    Threads,
    Requests,
}

impl TrackedTopic {
    const fn name(self) -> &'static str {
        match self {
            Self::Threads => "threads",
            Self::Requests => "requests",
        }
    }

    const fn all() -> [Self; 2] {
        [Self::Threads, Self::Requests]
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Visual status of a tracked topic, controlling its display color in the
/// progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TopicStatus {
    /// Normal active state (default color).
    Active = 0,
    /// Waiting for a credential to reset (blinks yellow).
    Blocked = 1,
    /// Everything issued has completed (green).
    Done = 2,
}

#[derive(Debug, Default)]
struct Counter {
    issued: AtomicU64,
    completed: AtomicU64,
    status: AtomicU8,
}

/// Tracks harvested threads and issued requests and feeds the progress indicator.
///
/// Clones share the same counters, so a tracker can be handed to every task.
#[derive(Clone)]
pub struct RequestTracker {
    counters: Arc<[Counter; 2]>,
    progress: Arc<dyn Progress>,
    use_colors: bool,
}

impl core::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("counters", &self.counters)
            .field("progress", &"<dyn Progress>")
            .field("use_colors", &self.use_colors)
            .finish()
    }
}

impl RequestTracker {
    /// Create a new tracker that reports through `progress`.
    #[must_use]
    pub fn new(progress: &Arc<dyn Progress>) -> Self {
        let tracker = Self {
            counters: Arc::default(),
            progress: Arc::clone(progress),
            use_colors: progress.use_colors(),
        };

        tracker.show_threads();
        tracker
    }

    /// Show a bar driven by the thread count.
    pub fn show_threads(&self) {
        let counters = Arc::clone(&self.counters);
        let use_colors = self.use_colors;
        self.progress
            .set_determinate(Box::new(move || Self::progress_reporter_callback(&counters, use_colors)));
    }

    /// Show a spinner with the number of requests made so far, for phases whose size is not yet known.
    pub fn show_requests(&self) {
        let counters = Arc::clone(&self.counters);
        self.progress.set_indeterminate(Box::new(move || {
            let issued = counters[TrackedTopic::Requests.index()].issued.load(Ordering::Relaxed);
            format!("{issued} requests")
        }));
    }

    /// Print a message line without disrupting the progress indicator.
    pub fn println(&self, msg: &str) {
        self.progress.println(msg);
    }

    /// Change the phase label shown next to the progress bar.
    pub fn set_phase(&self, phase: &str) {
        self.progress.set_phase(phase);
    }

    /// Mark that `count` new units of work have been issued for the given topic.
    pub fn add_requests(&self, topic: TrackedTopic, count: u64) {
        let counter = &self.counters[topic.index()];
        let _ = counter.issued.fetch_add(count, Ordering::Relaxed);
    }

    /// Mark that one unit of work has completed for the given topic.
    ///
    /// Sets the topic to [`TopicStatus::Done`] once everything issued has completed.
    pub fn complete_request(&self, topic: TrackedTopic) {
        let counter = &self.counters[topic.index()];
        let completed = counter.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let issued = counter.issued.load(Ordering::Relaxed);
        if completed >= issued && issued > 0 {
            counter.status.store(TopicStatus::Done as u8, Ordering::Relaxed);
        }
    }

    /// Set the visual status of a topic.
    pub fn set_topic_status(&self, topic: TrackedTopic, status: TopicStatus) {
        self.counters[topic.index()].status.store(status as u8, Ordering::Relaxed);
    }

    /// Number of completed units for the given topic.
    #[must_use]
    pub fn completed(&self, topic: TrackedTopic) -> u64 {
        self.counters[topic.index()].completed.load(Ordering::Relaxed)
    }

    /// Number of issued units for the given topic.
    #[must_use]
    pub fn issued(&self, topic: TrackedTopic) -> u64 {
        self.counters[topic.index()].issued.load(Ordering::Relaxed)
    }

    /// Returns (`total_length`, `current_position`, `message_string`).
    ///
    /// The bar length follows the thread count; requests only contribute to the message.
    fn progress_reporter_callback(counters: &[Counter; 2], use_colors: bool) -> (u64, u64, String) {
        // toggle every 500ms for the blink effect on blocked topics
        let blink_on = use_colors && {
            let ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            (ms / 500).is_multiple_of(2)
        };

        let mut parts = Vec::with_capacity(TrackedTopic::all().len());
        for topic in TrackedTopic::all() {
            let counter = &counters[topic.index()];
            let issued = counter.issued.load(Ordering::Relaxed);
            if issued == 0 {
                continue;
            }

            let completed = counter.completed.load(Ordering::Relaxed);
            let text = format!("{completed}/{issued} {}", topic.name());
            let status = counter.status.load(Ordering::Relaxed);

            let styled = if use_colors && status == TopicStatus::Done as u8 {
                format!("{}", text.green())
            } else if status == TopicStatus::Blocked as u8 && blink_on {
                format!("{}", text.yellow())
            } else {
                text
            };

            parts.push(styled);
        }

        let threads = &counters[TrackedTopic::Threads.index()];
        let message = if parts.is_empty() {
            "No requests".to_string()
        } else {
            parts.join(", ")
        };

        (
            threads.issued.load(Ordering::Relaxed),
            threads.completed.load(Ordering::Relaxed),
            message,
        )
    }
}
