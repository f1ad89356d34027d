//! Live-updating edit controller
//!
//! Owns an [`EditSession`] behind a short-lived lock and a driver task that
//! fires the debounce timer, performs the round trips, and applies confirmed
//! steps to the shared step list.

use super::{Completion, EditSession, EditSnapshot};
use crate::channel::MessageChannel;
use crate::config::EngineConfig;
use crate::error::{ChannelError, EditError};
use crate::step_list::SharedStepList;
use crate::types::{EditRequest, Step, StepType};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use sheetstep_codec::ParamCodec;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 64;

/// Notifications about round trips
#[derive(Debug, Clone)]
pub enum EditEvent {
    /// A request left for the kernel
    Sent(EditRequest),
    /// The kernel confirmed a step
    Confirmed(Step),
    /// A request failed; params were left as they are
    Failed(EditError),
}

/// Messages sent to the driver task
#[derive(Debug, Clone, Copy)]
enum DriverMessage {
    /// Session state changed; recompute the timer
    Wake,
    /// Stop, abandoning in-flight requests
    Shutdown,
}

struct Shared<C: ParamCodec> {
    session: Mutex<EditSession<C>>,
    snapshots: watch::Sender<EditSnapshot<C::Frontend>>,
    events: broadcast::Sender<EditEvent>,
}

impl<C: ParamCodec> Shared<C> {
    fn publish(&self) {
        let snapshot = self.session.lock().snapshot();
        self.snapshots.send_replace(snapshot);
    }
}

/// Debounced editor for one step family
///
/// Changes are applied to the optimistic params at once and reach the kernel
/// after the configured quiet period. Dropping the controller abandons any
/// request still in flight; its response is never applied.
pub struct LiveEditController<C: ParamCodec> {
    shared: Arc<Shared<C>>,
    driver: mpsc::UnboundedSender<DriverMessage>,
    task: JoinHandle<()>,
}

impl<C: ParamCodec> LiveEditController<C> {
    /// Spawn a controller using the debounce configured for `step_type`
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        codec: C,
        step_type: StepType,
        initial: C::Frontend,
        channel: Arc<dyn MessageChannel>,
        step_list: SharedStepList,
        config: &EngineConfig,
    ) -> Self {
        let session = EditSession::new(codec, step_type, initial, config.debounce_for(step_type));
        let (snapshots, _) = watch::channel(session.snapshot());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            session: Mutex::new(session),
            snapshots,
            events,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(shared.clone(), channel, step_list, rx));

        Self {
            shared,
            driver: tx,
            task,
        }
    }

    /// Current optimistic params
    #[must_use]
    pub fn params(&self) -> C::Frontend {
        self.shared.session.lock().params().clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> EditSnapshot<C::Frontend> {
        self.shared.snapshots.borrow().clone()
    }

    /// Watch snapshots as they change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EditSnapshot<C::Frontend>> {
        self.shared.snapshots.subscribe()
    }

    /// Receive round-trip notifications
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<EditEvent> {
        self.shared.events.subscribe()
    }

    /// Apply a local change and restart the debounce window
    pub fn set_params(&self, update: impl FnOnce(&mut C::Frontend)) {
        self.shared.session.lock().set_params(update, Instant::now());
        self.changed();
    }

    /// Replace the params wholesale
    pub fn replace_params(&self, params: C::Frontend) {
        self.shared
            .session
            .lock()
            .replace_params(params, Instant::now());
        self.changed();
    }

    /// End the logical step; the next change appends a new one
    pub fn start_new_step(&self) {
        self.shared.session.lock().start_new_step();
        self.changed();
    }

    /// End the logical step and switch to new params
    pub fn start_new_step_with(&self, params: C::Frontend) {
        self.shared.session.lock().start_new_step_with(params);
        self.changed();
    }

    /// Send pending changes without waiting out the window
    pub fn flush(&self) {
        self.shared.session.lock().flush(Instant::now());
        self.changed();
    }

    /// Stop the driver and wait for it to exit
    pub async fn shutdown(mut self) -> Result<(), EditError> {
        let _ = self.driver.send(DriverMessage::Shutdown);
        (&mut self.task)
            .await
            .map_err(|_| EditError::ControllerClosed)
    }

    /// Whether the driver task is still running
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    fn changed(&self) {
        self.shared.publish();
        if self.driver.send(DriverMessage::Wake).is_err() {
            tracing::warn!("edit controller driver has stopped");
        }
    }
}

impl<C: ParamCodec> Drop for LiveEditController<C> {
    fn drop(&mut self) {
        let _ = self.driver.send(DriverMessage::Shutdown);
        self.task.abort();
    }
}

type RoundTrip = BoxFuture<'static, (u64, Result<Step, ChannelError>)>;

async fn drive<C: ParamCodec>(
    shared: Arc<Shared<C>>,
    channel: Arc<dyn MessageChannel>,
    step_list: SharedStepList,
    mut rx: mpsc::UnboundedReceiver<DriverMessage>,
) {
    let mut in_flight: FuturesUnordered<RoundTrip> = FuturesUnordered::new();

    loop {
        let deadline = shared.session.lock().next_deadline();

        tokio::select! {
            message = rx.recv() => match message {
                Some(DriverMessage::Wake) => continue,
                Some(DriverMessage::Shutdown) | None => break,
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() =>
            {
                let outgoing = shared.session.lock().poll(Instant::now());
                if let Some(outgoing) = outgoing {
                    tracing::info!(
                        step_type = %outgoing.request.step_type,
                        step_id = ?outgoing.request.step_id,
                        "sending edit"
                    );
                    let _ = shared.events.send(EditEvent::Sent(outgoing.request.clone()));
                    let channel = channel.clone();
                    in_flight.push(Box::pin(async move {
                        let result = channel.send_edit(outgoing.request).await;
                        (outgoing.session, result)
                    }));
                }
            }
            Some((session, result)) = in_flight.next(), if !in_flight.is_empty() => {
                if let Ok(step) = &result {
                    step_list.write().apply_confirmed(step.clone());
                }
                let completion = shared.session.lock().complete(session, &result, Instant::now());
                match result {
                    Ok(step) => {
                        if completion == Completion::Stale {
                            tracing::debug!(
                                step_id = %step.step_id,
                                "response for closed session recorded only"
                            );
                        }
                        let _ = shared.events.send(EditEvent::Confirmed(step));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "edit failed");
                        let _ = shared.events.send(EditEvent::Failed(EditError::Channel(err)));
                    }
                }
            }
        }

        shared.publish();
    }

    tracing::debug!(abandoned = in_flight.len(), "edit controller stopped");
}
