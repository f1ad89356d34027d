//! Edit-on-click controller
//!
//! For taskpanes that only talk to the kernel when the user presses a
//! button. Params stay local until [`OnClickEditor::edit`]; after the first
//! success later edits overwrite the same step.

use crate::channel::MessageChannel;
use crate::error::EditError;
use crate::step_list::SharedStepList;
use crate::types::{EditRequest, Step, StepId, StepType};
use sheetstep_codec::ParamCodec;
use std::sync::Arc;

/// Editor that sends one request per explicit `edit()` call
pub struct OnClickEditor<C: ParamCodec> {
    codec: C,
    step_type: StepType,
    params: C::Frontend,
    step_id: Option<StepId>,
    channel: Arc<dyn MessageChannel>,
    step_list: SharedStepList,
    last_error: Option<String>,
}

impl<C: ParamCodec> OnClickEditor<C> {
    /// Create editor with initial params
    #[must_use]
    pub fn new(
        codec: C,
        step_type: StepType,
        params: C::Frontend,
        channel: Arc<dyn MessageChannel>,
        step_list: SharedStepList,
    ) -> Self {
        Self {
            codec,
            step_type,
            params,
            step_id: None,
            channel,
            step_list,
            last_error: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn params(&self) -> &C::Frontend {
        &self.params
    }

    /// Change params locally; nothing is sent
    pub fn set_params(&mut self, update: impl FnOnce(&mut C::Frontend)) {
        update(&mut self.params);
    }

    /// Whether an edit has been confirmed for the current step
    #[inline]
    #[must_use]
    pub fn edit_applied(&self) -> bool {
        self.step_id.is_some()
    }

    #[inline]
    #[must_use]
    pub fn step_id(&self) -> Option<&StepId> {
        self.step_id.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Forget the confirmed step; the next edit appends
    pub fn start_new_step(&mut self) {
        self.step_id = None;
        self.last_error = None;
    }

    /// Send the current params and wait for the kernel
    pub async fn edit(&mut self) -> Result<Step, EditError> {
        let params = self.codec.to_wire_json(&self.params)?;
        let request = EditRequest {
            step_type: self.step_type,
            params,
            step_id: self.step_id.clone(),
        };
        tracing::info!(step_type = %self.step_type, step_id = ?request.step_id, "sending edit");

        match self.channel.send_edit(request).await {
            Ok(step) => {
                self.step_list.write().apply_confirmed(step.clone());
                self.step_id = Some(step.step_id.clone());
                self.last_error = None;
                Ok(step)
            }
            Err(err) => {
                tracing::warn!(step_type = %self.step_type, error = %err, "edit failed");
                self.last_error = Some(err.user_message());
                Err(err.into())
            }
        }
    }
}
