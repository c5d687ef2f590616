//! Plain-text rendering of snapshots and events for the console.

use std::fmt::Write as _;

use traycam_core::machine::{ConnectionStatus, SessionSnapshot, StreamMode, SubmissionState};
use traycam_realtime::events::SessionEvent;

fn connection_label(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Disconnected => "disconnected".into(),
        ConnectionStatus::Connecting => "connecting".into(),
        ConnectionStatus::Connected => "connected".into(),
        ConnectionStatus::Reconnecting { attempt, delay_ms } => {
            format!("reconnecting (attempt {attempt}, {delay_ms} ms)")
        }
        ConnectionStatus::Failed { reason } => format!("failed: {reason}"),
    }
}

/// One-line summary followed by the detection, manual-region and
/// assignment listings.
pub fn status_report(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let mode = match &snapshot.mode {
        StreamMode::Streaming => "streaming".to_string(),
        StreamMode::Frozen { frame_name, .. } => format!("frozen on {frame_name}"),
    };
    let submission = match snapshot.submission {
        SubmissionState::Idle if snapshot.can_submit => "ready to submit",
        SubmissionState::Idle => "idle",
        SubmissionState::InFlight => "submitting",
        SubmissionState::AwaitingFinalAck => "final level accepted, type 'confirm'",
        SubmissionState::Complete => "complete",
    };
    let _ = writeln!(
        out,
        "[{}] {} | level {} ({}/{}) | {}",
        connection_label(&snapshot.connection),
        mode,
        snapshot.food_level,
        snapshot.level_index + 1,
        snapshot.level_count,
        submission,
    );

    if matches!(snapshot.mode, StreamMode::Frozen { .. }) {
        for d in &snapshot.detections {
            let [x, y, w, h] = d.bbox.to_xywh();
            let _ = writeln!(out, "  detection {} {} at [{x:.0}, {y:.0}, {w:.0}, {h:.0}]", d.index, d.color);
        }
        for m in &snapshot.manual {
            let [x, y, w, h] = m.bbox.to_xywh();
            let _ = writeln!(out, "  manual #{} {} at [{x:.0}, {y:.0}, {w:.0}, {h:.0}]", m.id, m.color);
        }
        let _ = writeln!(
            out,
            "  missing {} / drawn {} / remaining {}",
            snapshot.missing_dishes,
            snapshot.manual.len(),
            snapshot.remaining
        );
        for (item, color) in snapshot.assignments.iter().enumerate() {
            let color = color.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into());
            let _ = writeln!(out, "  item {item}: {color}");
        }
    }

    if let Some(err) = &snapshot.last_error {
        let _ = writeln!(out, "  error: {err}");
    }
    out.truncate(out.trim_end().len());
    out
}

pub fn event_line(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Connected => "connected".into(),
        SessionEvent::Welcome { client_id } => format!("welcome, client id {client_id}"),
        SessionEvent::Subscribed { topic } => format!("subscribed to {topic}"),
        SessionEvent::Disconnected => "disconnected".into(),
        SessionEvent::Reconnecting { attempt, delay_ms } => {
            format!("reconnecting in {delay_ms} ms (attempt {attempt})")
        }
        SessionEvent::ConnectionFailed { reason } => format!("connection failed: {reason}"),
        SessionEvent::FrameReceived { frame_name } => format!("frame {frame_name}"),
        SessionEvent::DetectionsApplied { detections, missing_dishes, .. } => {
            format!("{detections} detections, {missing_dishes} missing")
        }
        SessionEvent::DetectionsIgnored { frame_name } => match frame_name {
            Some(name) => format!("ignored detections for {name}"),
            None => "ignored detections".into(),
        },
        SessionEvent::CommandFailed { kind, error } => format!("{kind} failed: {error}"),
        SessionEvent::SubmissionSucceeded { food_level } => format!("mapping for {food_level} accepted"),
        SessionEvent::SubmissionFailed { error } => format!("submission failed: {error}"),
        SessionEvent::LevelAdvanced { food_level } => format!("next food level {food_level}"),
        SessionEvent::AwaitingFinalAck => "all levels submitted, type 'confirm' to finish".into(),
        SessionEvent::SessionCompleted => "session complete".into(),
    }
}

#[cfg(test)]
mod tests {
    use traycam_core::types::FoodLevel;

    use super::*;

    #[test]
    fn events_render_as_short_lines() {
        assert_eq!(
            event_line(&SessionEvent::Reconnecting { attempt: 2, delay_ms: 2000 }),
            "reconnecting in 2000 ms (attempt 2)"
        );
        assert_eq!(
            event_line(&SessionEvent::LevelAdvanced { food_level: FoodLevel::new(50).unwrap() }),
            "next food level 50%"
        );
        assert_eq!(
            event_line(&SessionEvent::DetectionsIgnored { frame_name: None }),
            "ignored detections"
        );
    }

    #[test]
    fn connection_labels() {
        assert_eq!(connection_label(&ConnectionStatus::Connected), "connected");
        assert_eq!(
            connection_label(&ConnectionStatus::Failed { reason: "gone".into() }),
            "failed: gone"
        );
    }
}
