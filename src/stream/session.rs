//! Per-exchange session state

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

/// One request/response exchange
///
/// Owned by a single processor; a new request gets a new session.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    submitted: Instant,
    /// Text received so far, in receipt order
    accumulated: String,
    /// Text already revealed to the user
    displayed: String,
    /// Characters waiting for the typing scheduler
    pending: VecDeque<char>,
    first_packet: Option<Duration>,
    total: Option<Duration>,
    pub(crate) active: bool,
    pub(crate) typing: bool,
    audio_chunks: u64,
    audio_bytes: u64,
    protocol_errors: u64,
}

/// Snapshot of a session's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub first_packet_ms: Option<u64>,
    pub total_ms: Option<u64>,
    pub text_chars: usize,
    pub audio_chunks: u64,
    pub audio_bytes: u64,
    pub protocol_errors: u64,
}

impl SessionStats {
    /// First-packet latency when known, else total latency
    pub fn reported_latency_ms(&self) -> Option<u64> {
        self.first_packet_ms.or(self.total_ms)
    }
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            submitted: Instant::now(),
            accumulated: String::new(),
            displayed: String::new(),
            pending: VecDeque::new(),
            first_packet: None,
            total: None,
            active: true,
            typing: false,
            audio_chunks: 0,
            audio_bytes: 0,
            protocol_errors: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record first-packet latency; later calls are ignored
    pub fn mark_first_packet(&mut self) {
        if self.first_packet.is_none() {
            self.first_packet = Some(self.submitted.elapsed());
        }
    }

    pub fn mark_complete(&mut self) {
        self.total = Some(self.submitted.elapsed());
    }

    /// Append a text delta and queue it for typing
    pub fn push_delta(&mut self, delta: &str) {
        self.accumulated.push_str(delta);
        self.pending.extend(delta.chars());
    }

    /// Queue whatever part of the final text the deltas did not carry.
    /// Returns the number of characters added.
    pub fn push_remainder(&mut self, full_text: &str) -> usize {
        let received = self.accumulated.chars().count();
        let before = self.pending.len();
        for ch in full_text.chars().skip(received) {
            self.accumulated.push(ch);
            self.pending.push_back(ch);
        }
        self.pending.len() - before
    }

    /// Move one character from the typing queue to the displayed text
    pub fn reveal_next(&mut self) -> Option<char> {
        let ch = self.pending.pop_front()?;
        self.displayed.push(ch);
        Some(ch)
    }

    pub(crate) fn record_audio(&mut self, bytes: usize) {
        self.audio_chunks += 1;
        self.audio_bytes += bytes as u64;
    }

    pub(crate) fn record_protocol_error(&mut self) {
        self.protocol_errors += 1;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id,
            started_at: self.started_at,
            first_packet_ms: self.first_packet.map(|d| d.as_millis() as u64),
            total_ms: self.total.map(|d| d.as_millis() as u64),
            text_chars: self.accumulated.chars().count(),
            audio_chunks: self.audio_chunks,
            audio_bytes: self.audio_bytes,
            protocol_errors: self.protocol_errors,
        }
    }
}
