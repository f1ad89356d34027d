//! Step edit controller
//!
//! Turns a stream of local param changes into a bounded, debounced stream of
//! edit requests, one logical step at a time.
//!
//! - [`EditSession`] is the state machine. Every transition takes the current
//!   [`Instant`] explicitly, so it runs identically under a virtual clock.
//! - [`LiveEditController`] drives a session on a tokio task and performs the
//!   channel I/O.
//! - [`OnClickEditor`] sends exactly one request per explicit `edit()` call.

mod live;
mod on_click;

pub use live::{EditEvent, LiveEditController};
pub use on_click::OnClickEditor;

use crate::error::{ChannelError, EditError};
use crate::types::{EditRequest, Step, StepId, StepType};
use sheetstep_codec::ParamCodec;
use std::time::Duration;
use tokio::time::Instant;

/// Observable state of an edit session
#[derive(Debug, Clone, PartialEq)]
pub struct EditSnapshot<F> {
    /// Optimistic params shown to the user
    pub params: F,
    /// A request for the current session is in flight
    pub loading: bool,
    /// Local changes not yet sent
    pub pending: bool,
    /// Step the session is bound to, once the kernel confirmed one
    pub step_id: Option<StepId>,
    /// Text of the most recent failure, cleared by the next success
    pub last_error: Option<String>,
    /// Requests issued over the controller's lifetime
    pub requests_sent: u64,
}

/// A request ready to go out, tagged with the session that issued it
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub session: u64,
    pub request: EditRequest,
}

/// How a completed round trip related to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Response for the live session; it has been applied
    Current,
    /// Response for a session closed by `start_new_step`; ignored
    Stale,
}

/// Debounce and ordering state for one editor
///
/// At most one request per logical step is outstanding. Changes made while
/// it is in flight are folded into a single follow-up that is released as
/// soon as the response arrives.
#[derive(Debug)]
pub struct EditSession<C: ParamCodec> {
    codec: C,
    step_type: StepType,
    debounce: Duration,
    params: C::Frontend,
    step_id: Option<StepId>,
    session: u64,
    deadline: Option<Instant>,
    in_flight: bool,
    queued: bool,
    last_error: Option<String>,
    requests_sent: u64,
}

impl<C: ParamCodec> EditSession<C> {
    /// Create a session with no step bound yet
    #[must_use]
    pub fn new(codec: C, step_type: StepType, params: C::Frontend, debounce: Duration) -> Self {
        Self {
            codec,
            step_type,
            debounce,
            params,
            step_id: None,
            session: 0,
            deadline: None,
            in_flight: false,
            queued: false,
            last_error: None,
            requests_sent: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn params(&self) -> &C::Frontend {
        &self.params
    }

    #[inline]
    #[must_use]
    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    #[inline]
    #[must_use]
    pub fn step_id(&self) -> Option<&StepId> {
        self.step_id.as_ref()
    }

    /// Id of the live logical session
    #[inline]
    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// When the debounce timer fires, if armed
    #[inline]
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[inline]
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Apply a local change and restart the quiet period
    pub fn set_params(&mut self, update: impl FnOnce(&mut C::Frontend), now: Instant) {
        update(&mut self.params);
        self.deadline = Some(now + self.debounce);
        tracing::debug!(step_type = %self.step_type, session = self.session, "debounce armed");
    }

    /// Replace the params wholesale and restart the quiet period
    pub fn replace_params(&mut self, params: C::Frontend, now: Instant) {
        self.set_params(|current| *current = params, now);
    }

    /// Close the logical session; the next request appends a new step
    ///
    /// Unsent changes of the closed session are discarded; call
    /// [`flush`](Self::flush) first to keep them.
    pub fn start_new_step(&mut self) {
        self.session += 1;
        self.step_id = None;
        self.deadline = None;
        self.in_flight = false;
        self.queued = false;
        tracing::debug!(step_type = %self.step_type, session = self.session, "new logical step");
    }

    /// Close the session and adopt new params without arming the timer
    pub fn start_new_step_with(&mut self, params: C::Frontend) {
        self.start_new_step();
        self.params = params;
    }

    /// Make pending changes due immediately
    pub fn flush(&mut self, now: Instant) {
        if self.deadline.is_some() {
            self.deadline = Some(now);
        }
    }

    /// Release a request if the quiet period has elapsed
    ///
    /// While a request is in flight a due change is queued instead and
    /// released by [`complete`](Self::complete).
    pub fn poll(&mut self, now: Instant) -> Option<Outgoing> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;

        if self.in_flight {
            self.queued = true;
            tracing::debug!(step_type = %self.step_type, "follow-up queued behind in-flight edit");
            return None;
        }

        let params = match self.codec.to_wire_json(&self.params) {
            Ok(params) => params,
            Err(err) => {
                let err = EditError::from(err);
                tracing::warn!(step_type = %self.step_type, error = %err, "edit not sent");
                self.last_error = Some(err.to_string());
                return None;
            }
        };

        let request = EditRequest {
            step_type: self.step_type,
            params,
            step_id: self.step_id.clone(),
        };
        self.in_flight = true;
        self.requests_sent += 1;
        Some(Outgoing {
            session: self.session,
            request,
        })
    }

    /// Apply the outcome of a request issued by `session`
    pub fn complete(
        &mut self,
        session: u64,
        result: &Result<Step, ChannelError>,
        now: Instant,
    ) -> Completion {
        if session != self.session {
            return Completion::Stale;
        }

        self.in_flight = false;
        match result {
            Ok(step) => {
                self.step_id = Some(step.step_id.clone());
                self.last_error = None;
            }
            Err(err) => {
                self.last_error = Some(err.user_message());
            }
        }

        if self.queued {
            self.queued = false;
            self.deadline = Some(now);
        }
        Completion::Current
    }

    /// Current observable state
    #[must_use]
    pub fn snapshot(&self) -> EditSnapshot<C::Frontend> {
        EditSnapshot {
            params: self.params.clone(),
            loading: self.in_flight,
            pending: self.deadline.is_some() || self.queued,
            step_id: self.step_id.clone(),
            last_error: self.last_error.clone(),
            requests_sent: self.requests_sent,
        }
    }
}
