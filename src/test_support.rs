//! Scripted fakes shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::highlight::Highlight;
use crate::source::HighlightSource;

type Scripted = Result<Vec<Highlight>, FetchError>;

/// A highlight updated `minute` minutes after a fixed epoch.
pub fn highlight(id: u64, minute: i64) -> Highlight {
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    Highlight {
        id,
        text: format!("highlight #{id}"),
        note: None,
        location: None,
        location_type: None,
        highlighted_at: None,
        updated: Some(base + ChronoDuration::minutes(minute)),
        book_id: Some(7),
        url: None,
        color: None,
        tags: vec![],
    }
}

/// Source that replays a script, then repeats a fallback forever.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    latency: Duration,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
    seen_since: Mutex<Vec<DateTime<Utc>>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Ok(vec![]),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
            seen_since: Mutex::new(Vec::new()),
        }
    }

    pub fn always(err: FetchError) -> Self {
        Self {
            fallback: Err(err),
            ..Self::new(vec![])
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn seen_since(&self) -> Vec<DateTime<Utc>> {
        self.seen_since.lock().unwrap().clone()
    }
}

#[async_trait]
impl HighlightSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Highlight>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.seen_since.lock().unwrap().push(since);

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
            .map(|mut items| {
                items.truncate(limit);
                items
            })
    }
}

/// Fixed set of highlights served the way the real API does: only those
/// updated strictly after `since`, oldest first.
pub struct FilteringSource {
    items: Vec<Highlight>,
}

impl FilteringSource {
    pub fn new(items: Vec<Highlight>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl HighlightSource for FilteringSource {
    fn name(&self) -> &str {
        "filtering"
    }

    async fn fetch(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Highlight>, FetchError> {
        let mut out: Vec<Highlight> = self
            .items
            .iter()
            .filter(|h| h.progress_at().is_some_and(|at| at > since))
            .cloned()
            .collect();
        out.sort_by_key(|h| h.progress_at());
        out.truncate(limit);
        Ok(out)
    }
}
