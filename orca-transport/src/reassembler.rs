//! Fragment reassembly.
//!
//! Sessions live in a [`DashMap`] keyed by fragment session id. Each session
//! has its own mutex so fragments of unrelated sessions never contend. The
//! map is never locked while a session lock is held by the add path; the
//! completion and eviction paths remove a session from the map while holding
//! its lock, so a caller that finds a finished session simply looks up again.

use crate::error::ReassembleError;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use orca_protocol::FragmentHeader;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Collecting,
    Complete,
    Expired,
}

#[derive(Debug)]
struct Session {
    total: u16,
    fragments: BTreeMap<u16, Bytes>,
    last_access: Instant,
    state: SessionState,
}

impl Session {
    fn new(total: u16) -> Self {
        Self {
            total,
            fragments: BTreeMap::new(),
            last_access: Instant::now(),
            state: SessionState::Collecting,
        }
    }

    fn is_complete(&self) -> bool {
        self.fragments.len() == self.total as usize
    }

    fn assemble(&self) -> Bytes {
        let len = self.fragments.values().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(len);
        for payload in self.fragments.values() {
            buf.extend_from_slice(payload);
        }
        buf.freeze()
    }
}

/// Collects fragments per session and emits completed messages.
pub struct Reassembler {
    sessions: DashMap<u32, Arc<Mutex<Session>>>,
    timeout: Duration,
    shutdown: AtomicBool,
    notify: Notify,
}

impl Reassembler {
    /// Creates a reassembler that evicts sessions idle for longer than `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of sessions still collecting fragments.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Adds one fragment.
    ///
    /// Returns the reassembled message when this fragment completes its
    /// session, `None` while fragments are still missing. A repeated index
    /// replaces the earlier payload.
    pub fn add_fragment(
        &self,
        header: &FragmentHeader,
        payload: Bytes,
    ) -> Result<Option<Bytes>, ReassembleError> {
        let session_id = header.session_id;
        if header.total_packets == 0 {
            return Err(ReassembleError::ZeroTotal { session_id });
        }
        if header.current_packet >= header.total_packets {
            return Err(ReassembleError::IndexOutOfRange {
                session_id,
                index: header.current_packet,
                total: header.total_packets,
            });
        }

        loop {
            let entry = self
                .sessions
                .entry(session_id)
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(header.total_packets))))
                .value()
                .clone();

            let mut session = entry.lock();
            if session.state != SessionState::Collecting {
                // Finished between lookup and lock; it is already gone from the map
                continue;
            }

            if session.total != header.total_packets {
                return Err(ReassembleError::TotalMismatch {
                    session_id,
                    expected: session.total,
                    actual: header.total_packets,
                });
            }

            session.fragments.insert(header.current_packet, payload);
            session.last_access = Instant::now();

            if !session.is_complete() {
                return Ok(None);
            }

            let message = session.assemble();
            session.state = SessionState::Complete;
            self.sessions
                .remove_if(&session_id, |_, current| Arc::ptr_eq(current, &entry));
            tracing::debug!(
                "Reassembled session {} ({} fragments, {} bytes)",
                session_id,
                session.total,
                message.len()
            );
            return Ok(Some(message));
        }
    }

    /// Evicts every session idle for longer than the timeout. Returns the
    /// number of sessions evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<(u32, Arc<Mutex<Session>>)> = self
            .sessions
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut evicted = 0;
        for (session_id, entry) in candidates {
            let mut session = entry.lock();
            if session.state != SessionState::Collecting
                || now.duration_since(session.last_access) <= self.timeout
            {
                continue;
            }
            session.state = SessionState::Expired;
            self.sessions
                .remove_if(&session_id, |_, current| Arc::ptr_eq(current, &entry));
            tracing::debug!(
                "Evicted session {} with {}/{} fragments",
                session_id,
                session.fragments.len(),
                session.total
            );
            evicted += 1;
        }
        evicted
    }

    /// Runs the periodic sweep until [`Reassembler::shutdown`] is called.
    pub async fn run(&self) {
        tracing::debug!("Reassembly sweeper started (timeout={:?})", self.timeout);

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.timeout) => {}
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let evicted = self.sweep_expired();
            if evicted > 0 {
                tracing::debug!("Sweep evicted {} stale sessions", evicted);
            }
        }

        tracing::debug!("Reassembly sweeper stopped");
    }

    /// Stops the sweep. Sessions in flight are abandoned.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }
}
