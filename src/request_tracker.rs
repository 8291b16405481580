//! Correlation bookkeeping for requests awaiting a receiver reply.
//!
//! Three tables live here:
//! - the correlation table (`requestId` -> originating client request)
//! - per-client STOP queues, answered FIFO when the application stops
//! - the SET_VOLUME queue, answered one entry per volume-changed event
//!
//! Every entry remembers when it was created so stale entries can be evicted
//! instead of living until the session is rebound.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::debug;

use crate::config::RouterConfig;
use crate::protocol::RequestRecord;

#[derive(Debug, Clone)]
struct Tracked<T> {
    value: T,
    created_at: Instant,
}

impl<T> Tracked<T> {
    fn new(value: T, created_at: Instant) -> Self {
        Self { value, created_at }
    }

    fn is_expired(&self, timeout: Option<Duration>, now: Instant) -> bool {
        timeout.is_some_and(|timeout| now.saturating_duration_since(self.created_at) >= timeout)
    }
}

/// Which table an evicted entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiredKind {
    Request { request_id: i64 },
    Stop,
    Volume,
}

/// An entry evicted by [`RequestTracker::expire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredEntry {
    pub kind: ExpiredKind,
    pub record: RequestRecord,
}

pub struct RequestTracker {
    next_request_id: i64,
    requests: HashMap<i64, Tracked<RequestRecord>>,
    stop_requests: HashMap<String, VecDeque<Tracked<i32>>>,
    volume_requests: VecDeque<Tracked<RequestRecord>>,
    request_timeout: Option<Duration>,
    stop_request_timeout: Option<Duration>,
    volume_request_timeout: Option<Duration>,
}

impl RequestTracker {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            next_request_id: config.first_request_id.max(1),
            requests: HashMap::new(),
            stop_requests: HashMap::new(),
            volume_requests: VecDeque::new(),
            request_timeout: config.request_timeout(),
            stop_request_timeout: config.stop_request_timeout(),
            volume_request_timeout: config.volume_request_timeout(),
        }
    }

    /// Returns a request id that is not live in the correlation table.
    pub fn alloc_request_id(&mut self) -> i64 {
        loop {
            let id = self.next_request_id;
            self.next_request_id = self.next_request_id.checked_add(1).unwrap_or(1);
            if !self.requests.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn track_request(&mut self, request_id: i64, record: RequestRecord) {
        if let Some(displaced) = self
            .requests
            .insert(request_id, Tracked::new(record, Instant::now()))
        {
            debug!(
                "RequestTracker: request id {} reused; dropping record for client {}",
                request_id, displaced.value.client_id
            );
        }
    }

    /// Removes and returns the record for `request_id`; each id resolves once.
    pub fn take_request(&mut self, request_id: i64) -> Option<RequestRecord> {
        self.requests
            .remove(&request_id)
            .map(|tracked| tracked.value)
    }

    pub fn push_stop_request(&mut self, client_id: &str, sequence_number: i32) {
        self.stop_requests
            .entry(client_id.to_string())
            .or_default()
            .push_back(Tracked::new(sequence_number, Instant::now()));
    }

    /// Empties every STOP queue, preserving per-client submission order.
    pub fn drain_stop_requests(&mut self) -> Vec<(String, Vec<i32>)> {
        self.stop_requests
            .drain()
            .map(|(client_id, queue)| {
                let sequence_numbers = queue.into_iter().map(|tracked| tracked.value).collect();
                (client_id, sequence_numbers)
            })
            .collect()
    }

    pub fn push_volume_request(&mut self, record: RequestRecord) {
        self.volume_requests
            .push_back(Tracked::new(record, Instant::now()));
    }

    pub fn pop_volume_request(&mut self) -> Option<RequestRecord> {
        self.volume_requests
            .pop_front()
            .map(|tracked| tracked.value)
    }

    /// Drops every entry owned by `client_id`.
    pub fn purge_client(&mut self, client_id: &str) {
        self.requests
            .retain(|_, tracked| tracked.value.client_id != client_id);
        self.stop_requests.remove(client_id);
        self.volume_requests
            .retain(|tracked| tracked.value.client_id != client_id);
    }

    /// Discards all live entries. Request ids keep counting upward.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.stop_requests.clear();
        self.volume_requests.clear();
    }

    /// Removes every correlation and SET_VOLUME entry regardless of age.
    /// STOP queues are left for [`RequestTracker::drain_stop_requests`].
    pub fn drain_outstanding(&mut self) -> Vec<ExpiredEntry> {
        let mut requests: Vec<(i64, RequestRecord)> = self
            .requests
            .drain()
            .map(|(request_id, tracked)| (request_id, tracked.value))
            .collect();
        requests.sort_unstable_by_key(|(request_id, _)| *request_id);
        let mut drained: Vec<ExpiredEntry> = requests
            .into_iter()
            .map(|(request_id, record)| ExpiredEntry {
                kind: ExpiredKind::Request { request_id },
                record,
            })
            .collect();
        drained.extend(self.volume_requests.drain(..).map(|tracked| ExpiredEntry {
            kind: ExpiredKind::Volume,
            record: tracked.value,
        }));
        drained
    }

    /// Evicts entries older than their table's timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<ExpiredEntry> {
        let mut expired = Vec::new();

        let request_timeout = self.request_timeout;
        let mut expired_ids: Vec<i64> = self
            .requests
            .iter()
            .filter(|(_, tracked)| tracked.is_expired(request_timeout, now))
            .map(|(request_id, _)| *request_id)
            .collect();
        expired_ids.sort_unstable();
        for request_id in expired_ids {
            if let Some(tracked) = self.requests.remove(&request_id) {
                expired.push(ExpiredEntry {
                    kind: ExpiredKind::Request { request_id },
                    record: tracked.value,
                });
            }
        }

        let stop_timeout = self.stop_request_timeout;
        for (client_id, queue) in self.stop_requests.iter_mut() {
            while queue
                .front()
                .is_some_and(|tracked| tracked.is_expired(stop_timeout, now))
            {
                if let Some(tracked) = queue.pop_front() {
                    expired.push(ExpiredEntry {
                        kind: ExpiredKind::Stop,
                        record: RequestRecord::new(client_id.clone(), tracked.value),
                    });
                }
            }
        }
        self.stop_requests.retain(|_, queue| !queue.is_empty());

        let volume_timeout = self.volume_request_timeout;
        while self
            .volume_requests
            .front()
            .is_some_and(|tracked| tracked.is_expired(volume_timeout, now))
        {
            if let Some(tracked) = self.volume_requests.pop_front() {
                expired.push(ExpiredEntry {
                    kind: ExpiredKind::Volume,
                    record: tracked.value,
                });
            }
        }

        expired
    }

    pub fn pending_request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn stop_queue_len(&self, client_id: &str) -> usize {
        self.stop_requests.get(client_id).map_or(0, VecDeque::len)
    }

    pub fn volume_queue_len(&self) -> usize {
        self.volume_requests.len()
    }
}
