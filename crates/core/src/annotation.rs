//! Manual annotation controller.
//!
//! Pointer-driven rectangle drawing on the frozen frame:
//! `Disabled -> Idle -> Dragging -> Idle`. A gesture that cannot be
//! committed (too small, no geometry, no budget) is dropped without
//! touching any other state.

use serde::Serialize;

use crate::capture::{CaptureState, ManualRectangle};
use crate::geometry::{display_to_image, BoundingBox, DisplayGeometry, Point};

/// Minimum width and height of a committed drag, in display pixels.
pub const MIN_DRAG_SIZE: f64 = 10.0;

/// Drawing state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DrawState {
    /// Drawing mode is off.
    #[default]
    Disabled,
    /// Drawing mode is on, no gesture in progress.
    Idle,
    /// A drag is in progress. Both corners are in display space.
    Dragging { anchor: Point, current: Point },
}

/// What a pointer event did.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    /// The event did not apply in the current state.
    Ignored,
    Started,
    Updated,
    Committed(ManualRectangle),
    /// Below [`MIN_DRAG_SIZE`] on at least one axis.
    Rejected,
    /// Pointer left the image while dragging.
    Cancelled,
    /// Geometry or budget unavailable at commit time.
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationController {
    state: DrawState,
}

impl AnnotationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DrawState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.state, DrawState::Disabled)
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DrawState::Dragging { .. })
    }

    /// Turn drawing mode on. The caller checks the frozen/budget
    /// preconditions.
    pub fn enable(&mut self) {
        if matches!(self.state, DrawState::Disabled) {
            self.state = DrawState::Idle;
        }
    }

    /// Turn drawing mode off, dropping any drag in progress.
    pub fn disable(&mut self) {
        self.state = DrawState::Disabled;
    }

    /// The live rectangle while dragging, in display space.
    pub fn live_rect(&self) -> Option<(Point, Point)> {
        match self.state {
            DrawState::Dragging { anchor, current } => Some((anchor, current)),
            _ => None,
        }
    }

    pub fn pointer_down(&mut self, at: Point, frozen: bool, remaining: u32) -> GestureOutcome {
        if !matches!(self.state, DrawState::Idle) || !frozen || remaining == 0 {
            return GestureOutcome::Ignored;
        }
        self.state = DrawState::Dragging {
            anchor: at,
            current: at,
        };
        GestureOutcome::Started
    }

    pub fn pointer_move(&mut self, at: Point) -> GestureOutcome {
        match &mut self.state {
            DrawState::Dragging { current, .. } => {
                *current = at;
                GestureOutcome::Updated
            }
            _ => GestureOutcome::Ignored,
        }
    }

    pub fn pointer_leave(&mut self) -> GestureOutcome {
        if self.is_dragging() {
            self.state = DrawState::Idle;
            GestureOutcome::Cancelled
        } else {
            GestureOutcome::Ignored
        }
    }

    /// Finish a drag at `at`.
    ///
    /// The color is allocated from `capture` at this moment, not at drag
    /// start, so a color freed by a removal mid-drag is reused correctly.
    /// When the budget reaches zero drawing mode switches itself off.
    pub fn pointer_up(
        &mut self,
        at: Point,
        geometry: Option<&DisplayGeometry>,
        capture: &mut CaptureState,
    ) -> GestureOutcome {
        let DrawState::Dragging { anchor, .. } = self.state else {
            return GestureOutcome::Ignored;
        };
        self.state = DrawState::Idle;

        let width = (at.x - anchor.x).abs();
        let height = (at.y - anchor.y).abs();
        if width < MIN_DRAG_SIZE || height < MIN_DRAG_SIZE {
            tracing::debug!(width, height, "Drag below minimum size, discarded");
            return GestureOutcome::Rejected;
        }

        let Some(geometry) = geometry else {
            tracing::debug!("No display geometry, drag aborted");
            return GestureOutcome::Aborted;
        };

        let bbox = BoundingBox::from_points(
            display_to_image(anchor, geometry),
            display_to_image(at, geometry),
        );

        let outcome = match capture.push_manual(bbox) {
            Ok(rect) => GestureOutcome::Committed(rect.clone()),
            Err(e) => {
                tracing::debug!(error = %e, "Manual rectangle not committed");
                GestureOutcome::Aborted
            }
        };

        if capture.remaining() == 0 {
            self.state = DrawState::Disabled;
        }
        outcome
    }
}
