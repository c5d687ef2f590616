//! The session state machine.
//!
//! [`SessionMachine`] is the single owner of every piece of per-session
//! state: connection status, live/frozen mode, the latest and displayed
//! frames, the capture regions, the annotation controller, the color
//! assignment and the submission cursor. UI code sends [`Intent`]s and
//! reads [`SessionSnapshot`]s; the async driver feeds inbound events and
//! executes the returned [`Effect`]s.
//!
//! Once [`SessionMachine::close`] has run every transition is a no-op,
//! so late network callbacks cannot mutate a torn-down session.

use std::sync::Arc;

use serde::Serialize;

use crate::annotation::{AnnotationController, DrawState, GestureOutcome};
use crate::capture::{CaptureState, DetectionResult, ManualRectangle, RegionSource};
use crate::error::CoreError;
use crate::frame::{DetectionBatch, DetectionSchema, Frame};
use crate::geometry::{bbox_to_display, compute_display_geometry, DisplayGeometry, Point, Size};
use crate::mapping::{build_dish_results, validate_dish_results, ColorAssignment};
use crate::palette::Color;
use crate::session::Session;
use crate::types::{FoodLevel, FrameName, ManualRectId};
use crate::wire::{ControlCommand, DishMappingPayload, StopStreamingData};

// ---------------------------------------------------------------------------
// State enums
// ---------------------------------------------------------------------------

/// Realtime connection status as seen by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Reconnection attempts exhausted. Not retried further.
    Failed { reason: String },
}

/// Live stream or a single frozen frame. Annotation is only possible
/// while frozen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StreamMode {
    Streaming,
    Frozen {
        frame_name: FrameName,
        food_level: FoodLevel,
    },
}

/// Single-flight submission cursor for the current food level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Idle,
    InFlight,
    /// Terminal level submitted; waiting for the operator's confirmation.
    AwaitingFinalAck,
    Complete,
}

/// Operator intents.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Capture,
    Resume,
    SetDrawingMode(bool),
    PointerDown(Point),
    PointerMove(Point),
    PointerUp(Point),
    PointerLeave,
    RemoveDetection(usize),
    RemoveManual(ManualRectId),
    Assign { item: usize, color: Color },
    Unassign { item: usize },
    Submit,
    AcknowledgeFinal { confirmed: bool },
    DismissError,
    SetViewport(Size),
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fire-and-forget control message.
    Send(ControlCommand),
    /// Mapping submission; the driver reports the result back through
    /// [`SessionMachine::submission_succeeded`] or
    /// [`SessionMachine::submission_failed`].
    Submit(ControlCommand),
    /// The operator confirmed the final level; tear the session down.
    EndSession,
}

/// A region projected into display space for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub color: Color,
    pub source: RegionSource,
    pub top_left: Point,
    pub bottom_right: Point,
}

/// Read-only view of the machine, published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionStatus,
    pub client_id: Option<String>,
    pub mode: StreamMode,
    pub food_level: FoodLevel,
    pub level_index: usize,
    pub level_count: usize,
    pub displayed_frame: Option<FrameName>,
    pub latest_frame: Option<FrameName>,
    pub detections: Vec<DetectionResult>,
    pub manual: Vec<ManualRectangle>,
    pub missing_dishes: u32,
    pub remaining: u32,
    pub draw_state: DrawState,
    /// Color per menu item, in menu order.
    pub assignments: Vec<Option<Color>>,
    pub available_colors: Vec<Color>,
    pub can_submit: bool,
    pub submission: SubmissionState,
    pub last_error: Option<String>,
    pub completed: bool,
}

// ---------------------------------------------------------------------------
// SessionMachine
// ---------------------------------------------------------------------------

pub struct SessionMachine {
    session: Session,
    connection: ConnectionStatus,
    client_id: Option<String>,
    mode: StreamMode,
    latest_frame: Option<Arc<Frame>>,
    displayed_frame: Option<Arc<Frame>>,
    capture: CaptureState,
    annotation: AnnotationController,
    assignment: ColorAssignment,
    viewport: Option<Size>,
    submission: SubmissionState,
    metadata_sent: bool,
    closed: bool,
    last_error: Option<String>,
}

impl SessionMachine {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            connection: ConnectionStatus::Disconnected,
            client_id: None,
            mode: StreamMode::Streaming,
            latest_frame: None,
            displayed_frame: None,
            capture: CaptureState::new(),
            annotation: AnnotationController::new(),
            assignment: ColorAssignment::new(),
            viewport: None,
            submission: SubmissionState::Idle,
            metadata_sent: false,
            closed: false,
            last_error: None,
        }
    }

    // ---- connection lifecycle ----

    pub fn connecting(&mut self) {
        if self.closed {
            return;
        }
        self.connection = ConnectionStatus::Connecting;
    }

    /// The realtime channel is up. Streaming starts (or resumes) right
    /// away unless a frame is frozen, in which case the server must not
    /// be told to stream again.
    pub fn connected(&mut self) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }
        self.connection = ConnectionStatus::Connected;
        match self.mode {
            StreamMode::Streaming => vec![Effect::Send(self.start_command())],
            StreamMode::Frozen { .. } => Vec::new(),
        }
    }

    pub fn welcome(&mut self, client_id: impl Into<String>) {
        if self.closed {
            return;
        }
        self.client_id = Some(client_id.into());
    }

    pub fn connection_lost(&mut self) {
        if self.closed || matches!(self.connection, ConnectionStatus::Failed { .. }) {
            return;
        }
        self.connection = ConnectionStatus::Disconnected;
    }

    pub fn reconnecting(&mut self, attempt: u32, delay_ms: u64) {
        if self.closed {
            return;
        }
        self.connection = ConnectionStatus::Reconnecting { attempt, delay_ms };
    }

    /// Terminal connection failure after the attempt ceiling.
    pub fn connection_failed(&mut self, reason: impl Into<String>) {
        if self.closed {
            return;
        }
        self.connection = ConnectionStatus::Failed {
            reason: reason.into(),
        };
    }

    /// Tear the session down. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
        self.connection = ConnectionStatus::Disconnected;
        self.annotation.disable();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ---- inbound events ----

    /// Record a streamed frame. Last writer wins; once frozen, new
    /// frames are kept as "latest" but never displayed.
    pub fn frame_received(&mut self, frame: Frame) {
        if self.closed {
            return;
        }
        let frame = Arc::new(frame);
        if matches!(self.mode, StreamMode::Streaming) {
            self.displayed_frame = Some(Arc::clone(&frame));
        }
        self.latest_frame = Some(frame);
    }

    /// Apply a detection batch if it belongs to the frozen capture.
    ///
    /// Returns whether the batch was honored. A batch naming a different
    /// frame or food level is stale and dropped; a batch without a frame
    /// name is accepted only while this capture still awaits results.
    pub fn detections_received(&mut self, batch: DetectionBatch) -> bool {
        if self.closed {
            return false;
        }
        let (frozen_name, frozen_level) = match &self.mode {
            StreamMode::Frozen {
                frame_name,
                food_level,
            } => (frame_name.clone(), *food_level),
            StreamMode::Streaming => {
                tracing::debug!("Detection results while streaming, ignored");
                return false;
            }
        };
        if self.capture.results_received() {
            tracing::debug!(frame_name = %frozen_name, "Capture already has detection results, ignored");
            return false;
        }
        match &batch.frame_name {
            Some(name) if *name != frozen_name => {
                tracing::debug!(
                    frame_name = %name,
                    frozen = %frozen_name,
                    "Stale detection results for another frame, ignored",
                );
                return false;
            }
            Some(_) => {}
            None => {
                tracing::debug!(frozen = %frozen_name, "Detection results carry no frame name");
            }
        }
        if let Some(level) = batch.food_level {
            if level != frozen_level {
                tracing::debug!(
                    food_level = level.percent(),
                    frozen_level = frozen_level.percent(),
                    "Detection results for another food level, ignored",
                );
                return false;
            }
        }
        if batch.schema == DetectionSchema::Legacy {
            tracing::warn!(
                frame_name = %frozen_name,
                "Detection results used the legacy key scheme",
            );
        }

        self.capture
            .load_detections(&batch.boxes, batch.missing_dishes);
        tracing::info!(
            frame_name = %frozen_name,
            food_level = frozen_level.percent(),
            detections = self.capture.detections().len(),
            missing_dishes = batch.missing_dishes,
            "Detection results applied",
        );
        true
    }

    // ---- intents ----

    /// Apply one operator intent.
    ///
    /// An `Err` rejects the intent and leaves state unchanged. Region and
    /// assignment edits are refused with `Conflict` once the mapping has
    /// been submitted. Otherwise pointer gestures never fail; a gesture
    /// that cannot commit is dropped.
    pub fn apply(&mut self, intent: Intent) -> Result<Vec<Effect>, CoreError> {
        if self.closed {
            return Err(CoreError::InvalidState("session is closed".into()));
        }
        if is_edit(&intent) {
            self.require_editable()?;
        }
        match intent {
            Intent::Capture => self.capture_frame(),
            Intent::Resume => self.resume(),
            Intent::SetDrawingMode(enabled) => self.set_drawing_mode(enabled).map(|_| Vec::new()),
            Intent::PointerDown(at) => {
                let frozen = self.is_frozen() && self.capture.results_received();
                self.annotation
                    .pointer_down(at, frozen, self.capture.remaining());
                Ok(Vec::new())
            }
            Intent::PointerMove(at) => {
                self.annotation.pointer_move(at);
                Ok(Vec::new())
            }
            Intent::PointerUp(at) => {
                let geometry = self.display_geometry().ok();
                let outcome = self
                    .annotation
                    .pointer_up(at, geometry.as_ref(), &mut self.capture);
                if let GestureOutcome::Committed(rect) = &outcome {
                    tracing::info!(
                        id = rect.id,
                        color = %rect.color,
                        remaining = self.capture.remaining(),
                        "Manual rectangle committed",
                    );
                }
                Ok(Vec::new())
            }
            Intent::PointerLeave => {
                self.annotation.pointer_leave();
                Ok(Vec::new())
            }
            Intent::RemoveDetection(index) => {
                self.require_frozen()?;
                self.capture.remove_detection(index)?;
                Ok(Vec::new())
            }
            Intent::RemoveManual(id) => {
                self.require_frozen()?;
                self.capture.remove_manual(id)?;
                Ok(Vec::new())
            }
            Intent::Assign { item, color } => {
                self.require_frozen()?;
                if !self.capture.used_colors().contains(&color) {
                    return Err(CoreError::Validation(format!(
                        "no region is drawn in {color}"
                    )));
                }
                self.assignment
                    .assign(item, color, self.session.menu_item_count())?;
                Ok(Vec::new())
            }
            Intent::Unassign { item } => {
                self.assignment.unassign(item);
                Ok(Vec::new())
            }
            Intent::Submit => self.submit(),
            Intent::AcknowledgeFinal { confirmed } => self.acknowledge_final(confirmed),
            Intent::DismissError => {
                self.last_error = None;
                Ok(Vec::new())
            }
            Intent::SetViewport(size) => {
                self.viewport = Some(size);
                Ok(Vec::new())
            }
        }
    }

    fn capture_frame(&mut self) -> Result<Vec<Effect>, CoreError> {
        if self.session.is_completed() {
            return Err(CoreError::InvalidState("session already completed".into()));
        }
        if self.connection != ConnectionStatus::Connected {
            return Err(CoreError::InvalidState("realtime channel is not connected".into()));
        }
        if self.submission != SubmissionState::Idle {
            return Err(CoreError::InvalidState(
                "current food level is already submitted".into(),
            ));
        }
        if self.is_frozen() {
            return Err(CoreError::InvalidState("a frame is already captured".into()));
        }
        let frame = self
            .latest_frame
            .clone()
            .ok_or_else(|| CoreError::InvalidState("no frame received yet".into()))?;

        let food_level = self.session.current_level();
        self.mode = StreamMode::Frozen {
            frame_name: frame.name.clone(),
            food_level,
        };
        tracing::info!(
            frame_name = %frame.name,
            food_level = food_level.percent(),
            "Frame captured",
        );
        let command = ControlCommand::StopStreaming(StopStreamingData {
            frame_name: frame.name.clone(),
            food_level,
        });
        self.displayed_frame = Some(frame);
        Ok(vec![Effect::Send(command)])
    }

    fn resume(&mut self) -> Result<Vec<Effect>, CoreError> {
        match self.submission {
            SubmissionState::InFlight => {
                return Err(CoreError::Conflict("submission in flight".into()));
            }
            SubmissionState::AwaitingFinalAck | SubmissionState::Complete => {
                return Err(CoreError::InvalidState("session is finishing".into()));
            }
            SubmissionState::Idle => {}
        }
        self.reset_capture();
        self.mode = StreamMode::Streaming;
        self.displayed_frame = self.latest_frame.clone();
        tracing::info!("Streaming resumed");
        Ok(vec![Effect::Send(self.start_command())])
    }

    fn set_drawing_mode(&mut self, enabled: bool) -> Result<(), CoreError> {
        if !enabled {
            self.annotation.disable();
            return Ok(());
        }
        self.require_frozen()?;
        if !self.capture.results_received() {
            return Err(CoreError::InvalidState(
                "detection results have not arrived".into(),
            ));
        }
        if self.capture.remaining() == 0 {
            return Err(CoreError::Conflict("no missing dishes left to draw".into()));
        }
        self.annotation.enable();
        Ok(())
    }

    fn submit(&mut self) -> Result<Vec<Effect>, CoreError> {
        match self.submission {
            SubmissionState::InFlight => {
                return Err(CoreError::Conflict("submission already in flight".into()));
            }
            SubmissionState::AwaitingFinalAck | SubmissionState::Complete => {
                return Err(CoreError::InvalidState(
                    "current food level is already submitted".into(),
                ));
            }
            SubmissionState::Idle => {}
        }
        let food_level = match &self.mode {
            StreamMode::Frozen { food_level, .. } => *food_level,
            StreamMode::Streaming => {
                return Err(CoreError::InvalidState("no frame is captured".into()));
            }
        };
        if !self.capture.results_received() {
            return Err(CoreError::InvalidState(
                "detection results have not arrived".into(),
            ));
        }
        if !self.is_all_colors_mapped() {
            return Err(CoreError::Validation(
                "every menu item needs a color before submitting".into(),
            ));
        }

        let dish_results =
            build_dish_results(self.session.dishes(), &self.assignment, &self.capture);
        validate_dish_results(&dish_results, self.session.dishes())?;

        self.submission = SubmissionState::InFlight;
        tracing::info!(
            food_level = food_level.percent(),
            dishes = dish_results.len(),
            "Submitting dish mapping",
        );
        Ok(vec![Effect::Submit(ControlCommand::UserDishMapping(
            DishMappingPayload {
                flight_details: self.session.flight_details(),
                menu_details: self.session.menu_ref(),
                food_level,
                dish_results,
            },
        ))])
    }

    fn acknowledge_final(&mut self, confirmed: bool) -> Result<Vec<Effect>, CoreError> {
        if self.submission != SubmissionState::AwaitingFinalAck {
            return Err(CoreError::InvalidState(
                "nothing is waiting for confirmation".into(),
            ));
        }
        if !confirmed {
            return Err(CoreError::Validation(
                "the completion checkbox must be ticked".into(),
            ));
        }
        self.submission = SubmissionState::Complete;
        self.session.complete();
        self.annotation.disable();
        tracing::info!(flight = self.session.flight_number(), "Session completed");
        Ok(vec![Effect::EndSession])
    }

    // ---- command results ----

    /// The in-flight submission was accepted.
    ///
    /// Non-terminal levels advance the cursor, clear the capture and
    /// resume streaming. The terminal level waits for confirmation.
    pub fn submission_succeeded(&mut self) -> Vec<Effect> {
        if self.closed || self.submission != SubmissionState::InFlight {
            return Vec::new();
        }
        if self.session.is_terminal_level() {
            self.submission = SubmissionState::AwaitingFinalAck;
            return Vec::new();
        }
        self.submission = SubmissionState::Idle;
        match self.session.advance() {
            Ok(level) => tracing::info!(food_level = level.percent(), "Advanced to next food level"),
            Err(e) => tracing::error!(error = %e, "Food level cursor did not advance"),
        }
        self.reset_capture();
        self.mode = StreamMode::Streaming;
        self.displayed_frame = self.latest_frame.clone();
        vec![Effect::Send(self.start_command())]
    }

    /// The in-flight submission was rejected. Everything but the error
    /// message stays as it was so the operator can retry.
    pub fn submission_failed(&mut self, message: impl Into<String>) {
        if self.closed {
            return;
        }
        if self.submission == SubmissionState::InFlight {
            self.submission = SubmissionState::Idle;
        }
        self.last_error = Some(message.into());
    }

    /// A fire-and-forget control message could not be delivered.
    pub fn command_failed(&mut self, kind: &str, message: impl Into<String>) {
        if self.closed {
            return;
        }
        self.last_error = Some(format!("{kind} failed: {}", message.into()));
    }

    // ---- read-only view ----

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn connection(&self) -> &ConnectionStatus {
        &self.connection
    }

    pub fn mode(&self) -> &StreamMode {
        &self.mode
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self.mode, StreamMode::Frozen { .. })
    }

    pub fn latest_frame(&self) -> Option<&Frame> {
        self.latest_frame.as_deref()
    }

    pub fn displayed_frame(&self) -> Option<&Frame> {
        self.displayed_frame.as_deref()
    }

    pub fn capture(&self) -> &CaptureState {
        &self.capture
    }

    pub fn annotation(&self) -> &AnnotationController {
        &self.annotation
    }

    pub fn assignment(&self) -> &ColorAssignment {
        &self.assignment
    }

    pub fn submission(&self) -> SubmissionState {
        self.submission
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn remaining(&self) -> u32 {
        self.capture.remaining()
    }

    pub fn is_all_colors_mapped(&self) -> bool {
        self.assignment
            .is_all_colors_mapped(self.session.menu_item_count())
    }

    /// Whether the submit control should be enabled.
    pub fn can_submit(&self) -> bool {
        !self.closed
            && self.is_frozen()
            && self.capture.results_received()
            && self.submission == SubmissionState::Idle
            && self.is_all_colors_mapped()
    }

    /// Placement of the displayed frame inside the current viewport.
    pub fn display_geometry(&self) -> Result<DisplayGeometry, CoreError> {
        let viewport = self
            .viewport
            .ok_or_else(|| CoreError::Geometry("viewport size unknown".into()))?;
        let natural = self
            .displayed_frame
            .as_ref()
            .and_then(|f| f.image.natural_size)
            .ok_or_else(|| CoreError::Geometry("frame size unknown".into()))?;
        compute_display_geometry(
            natural.width,
            natural.height,
            viewport.width,
            viewport.height,
        )
    }

    /// Every active region in display space. Empty when geometry is
    /// unavailable.
    pub fn overlays(&self) -> Vec<Overlay> {
        let Ok(geometry) = self.display_geometry() else {
            return Vec::new();
        };
        let detections = self
            .capture
            .detections()
            .iter()
            .map(|d| (d.color, RegionSource::Detection, d.bbox));
        let manual = self
            .capture
            .manual()
            .iter()
            .map(|m| (m.color, RegionSource::Manual, m.bbox));
        detections
            .chain(manual)
            .map(|(color, source, bbox)| {
                let (top_left, bottom_right) = bbox_to_display(&bbox, &geometry);
                Overlay {
                    color,
                    source,
                    top_left,
                    bottom_right,
                }
            })
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let plan = self.session.plan();
        SessionSnapshot {
            connection: self.connection.clone(),
            client_id: self.client_id.clone(),
            mode: self.mode.clone(),
            food_level: self.session.current_level(),
            level_index: plan.cursor(),
            level_count: plan.levels().len(),
            displayed_frame: self.displayed_frame.as_ref().map(|f| f.name.clone()),
            latest_frame: self.latest_frame.as_ref().map(|f| f.name.clone()),
            detections: self.capture.detections().to_vec(),
            manual: self.capture.manual().to_vec(),
            missing_dishes: self.capture.missing_dishes(),
            remaining: self.capture.remaining(),
            draw_state: self.annotation.state(),
            assignments: (0..self.session.menu_item_count())
                .map(|item| self.assignment.color_of(item))
                .collect(),
            available_colors: self.capture.ordered_colors(),
            can_submit: self.can_submit(),
            submission: self.submission,
            last_error: self.last_error.clone(),
            completed: self.session.is_completed(),
        }
    }

    // ---- private helpers ----

    /// Regions and assignments are locked from submission until the
    /// level advances or the submission fails.
    fn require_editable(&self) -> Result<(), CoreError> {
        match self.submission {
            SubmissionState::Idle => Ok(()),
            SubmissionState::InFlight => Err(CoreError::Conflict("submission in flight".into())),
            SubmissionState::AwaitingFinalAck | SubmissionState::Complete => Err(
                CoreError::Conflict("mapping for this level is already submitted".into()),
            ),
        }
    }

    fn require_frozen(&self) -> Result<(), CoreError> {
        if self.is_frozen() {
            Ok(())
        } else {
            Err(CoreError::InvalidState("no frame is captured".into()))
        }
    }

    /// First `start_streaming` of the session carries the metadata;
    /// every later one is a bare resume.
    fn start_command(&mut self) -> ControlCommand {
        if self.metadata_sent {
            ControlCommand::resume()
        } else {
            self.metadata_sent = true;
            ControlCommand::StartStreaming(self.session.initial_start_data())
        }
    }

    fn reset_capture(&mut self) {
        self.capture.clear();
        self.annotation.disable();
        self.assignment.clear();
    }
}

/// Intents that change regions, the drawing state or color assignments.
/// Turning drawing mode off is always allowed.
fn is_edit(intent: &Intent) -> bool {
    matches!(
        intent,
        Intent::SetDrawingMode(true)
            | Intent::PointerDown(_)
            | Intent::PointerMove(_)
            | Intent::PointerUp(_)
            | Intent::PointerLeave
            | Intent::RemoveDetection(_)
            | Intent::RemoveManual(_)
            | Intent::Assign { .. }
            | Intent::Unassign { .. }
    )
}
