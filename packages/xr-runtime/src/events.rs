//! Per-instance event queue.
//!
//! FIFO, polled one event at a time. Session-state-changed is the only
//! event kind this runtime emits; the queue stores the concrete structs
//! and the poll entry point copies one into the caller's buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::abi::{
    XrEventDataSessionStateChanged, XrSession, XrSessionState, XrStructureType,
};
use crate::runtime::now_ns;

pub(crate) struct EventQueue {
    queue: Mutex<VecDeque<XrEventDataSessionStateChanged>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a session-state-changed event, stamped with the runtime clock.
    pub fn push_state_change(&self, session: XrSession, state: XrSessionState) {
        self.queue
            .lock()
            .unwrap()
            .push_back(XrEventDataSessionStateChanged {
                ty: XrStructureType::EventDataSessionStateChanged,
                next: std::ptr::null(),
                session,
                state,
                time: now_ns(),
            });
    }

    /// Pop the oldest pending event, if any.
    pub fn poll(&self) -> Option<XrEventDataSessionStateChanged> {
        self.queue.lock().unwrap().pop_front()
    }
}

// The stored events contain a raw `next` pointer, but it is always null
// for events this runtime creates.
unsafe impl Send for EventQueue {}
unsafe impl Sync for EventQueue {}
