//! Line-oriented operator commands.
//!
//! Each stdin line maps to zero or more [`Intent`]s, or to a console
//! action. Pointer coordinates are in display space.

use traycam_core::geometry::{Point, Size};
use traycam_core::machine::Intent;
use traycam_core::palette::Color;

pub const HELP: &str = "\
commands:
  capture                    freeze the current frame and request detections
  resume                     discard the capture and go back to streaming
  draw on|off                toggle manual drawing mode
  down|move|up X Y           pointer events in display coordinates
  leave                      pointer left the image
  rect X1 Y1 X2 Y2           draw a manual rectangle in one step
  remove-detection INDEX     drop a detection (counts as missing)
  remove-rect ID             drop a manual rectangle
  assign ITEM COLOR          map menu item ITEM to a color (slot 0-11 or #RRGGBB)
  unassign ITEM              clear the color of menu item ITEM
  submit                     submit the mapping for the current food level
  confirm                    acknowledge the final level and end the session
  dismiss                    clear the last error
  viewport W H               set the display container size
  status                     print the session state
  help                       show this text
  quit                       leave the console";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Forward to the session, in order.
    Intents(Vec<Intent>),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}', type 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("'{0}' is not a number")]
    Number(String),

    #[error("'{0}' is not a palette color")]
    Color(String),
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let single = |intent: Intent| Ok(Some(Command::Intents(vec![intent])));

    match verb.to_ascii_lowercase().as_str() {
        "capture" => single(Intent::Capture),
        "resume" => single(Intent::Resume),
        "draw" => match args.as_slice() {
            ["on"] => single(Intent::SetDrawingMode(true)),
            ["off"] => single(Intent::SetDrawingMode(false)),
            _ => Err(CommandError::Usage("draw on|off")),
        },
        "down" => single(Intent::PointerDown(point(&args, "down X Y")?)),
        "move" => single(Intent::PointerMove(point(&args, "move X Y")?)),
        "up" => single(Intent::PointerUp(point(&args, "up X Y")?)),
        "leave" => single(Intent::PointerLeave),
        "rect" => {
            let [x1, y1, x2, y2] = numbers::<4>(&args, "rect X1 Y1 X2 Y2")?;
            let start = Point::new(x1, y1);
            let end = Point::new(x2, y2);
            Ok(Some(Command::Intents(vec![
                Intent::PointerDown(start),
                Intent::PointerMove(end),
                Intent::PointerUp(end),
            ])))
        }
        "remove-detection" => single(Intent::RemoveDetection(index(&args, "remove-detection INDEX")?)),
        "remove-rect" => {
            let id = index(&args, "remove-rect ID")? as u64;
            single(Intent::RemoveManual(id))
        }
        "assign" => match args.as_slice() {
            [item, color] => single(Intent::Assign {
                item: parse_index(item)?,
                color: parse_color(color)?,
            }),
            _ => Err(CommandError::Usage("assign ITEM COLOR")),
        },
        "unassign" => single(Intent::Unassign {
            item: index(&args, "unassign ITEM")?,
        }),
        "submit" => single(Intent::Submit),
        "confirm" => single(Intent::AcknowledgeFinal { confirmed: true }),
        "dismiss" => single(Intent::DismissError),
        "viewport" => {
            let [w, h] = numbers::<2>(&args, "viewport W H")?;
            single(Intent::SetViewport(Size::new(w, h)))
        }
        "status" => Ok(Some(Command::Status)),
        "help" | "?" => Ok(Some(Command::Help)),
        "quit" | "exit" => Ok(Some(Command::Quit)),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// A slot number (`0`..`11`) or a palette hex code.
pub fn parse_color(raw: &str) -> Result<Color, CommandError> {
    let color = match raw.parse::<usize>() {
        Ok(slot) => Color::from_slot(slot),
        Err(_) => Color::from_hex(raw),
    };
    color.ok_or_else(|| CommandError::Color(raw.to_string()))
}

fn parse_index(raw: &str) -> Result<usize, CommandError> {
    raw.parse().map_err(|_| CommandError::Number(raw.to_string()))
}

fn index(args: &[&str], usage: &'static str) -> Result<usize, CommandError> {
    match args {
        [raw] => parse_index(raw),
        _ => Err(CommandError::Usage(usage)),
    }
}

fn point(args: &[&str], usage: &'static str) -> Result<Point, CommandError> {
    let [x, y] = numbers::<2>(args, usage)?;
    Ok(Point::new(x, y))
}

fn numbers<const N: usize>(args: &[&str], usage: &'static str) -> Result<[f64; N], CommandError> {
    if args.len() != N {
        return Err(CommandError::Usage(usage));
    }
    let mut out = [0.0; N];
    for (slot, raw) in out.iter_mut().zip(args) {
        *slot = raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| CommandError::Number(raw.to_string()))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn intents(line: &str) -> Vec<Intent> {
        match parse_line(line) {
            Ok(Some(Command::Intents(intents))) => intents,
            other => panic!("Expected intents, got {other:?}"),
        }
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# capture later"), Ok(None));
    }

    #[test]
    fn simple_verbs() {
        assert_eq!(intents("capture"), vec![Intent::Capture]);
        assert_eq!(intents("  RESUME "), vec![Intent::Resume]);
        assert_eq!(intents("draw on"), vec![Intent::SetDrawingMode(true)]);
        assert_eq!(intents("confirm"), vec![Intent::AcknowledgeFinal { confirmed: true }]);
        assert_eq!(parse_line("status"), Ok(Some(Command::Status)));
        assert_eq!(parse_line("exit"), Ok(Some(Command::Quit)));
    }

    #[test]
    fn rect_expands_to_a_full_gesture() {
        let start = Point::new(20.0, 20.0);
        let end = Point::new(80.0, 60.0);
        assert_eq!(
            intents("rect 20 20 80 60"),
            vec![Intent::PointerDown(start), Intent::PointerMove(end), Intent::PointerUp(end)]
        );
    }

    #[test]
    fn assign_accepts_slot_or_hex() {
        let red = Color::from_slot(0).unwrap();
        assert_eq!(intents("assign 2 0"), vec![Intent::Assign { item: 2, color: red }]);
        assert_eq!(intents("assign 2 #E6194B"), vec![Intent::Assign { item: 2, color: red }]);
        assert_matches!(parse_line("assign 2 12"), Err(CommandError::Color(_)));
        assert_matches!(parse_line("assign 2 #123456"), Err(CommandError::Color(_)));
    }

    #[test]
    fn bad_arguments_report_usage() {
        assert_matches!(parse_line("draw maybe"), Err(CommandError::Usage("draw on|off")));
        assert_matches!(parse_line("down 10"), Err(CommandError::Usage(_)));
        assert_matches!(parse_line("down 10 north"), Err(CommandError::Number(_)));
        assert_matches!(parse_line("move 1 NaN"), Err(CommandError::Number(_)));
        assert_matches!(parse_line("remove-detection -1"), Err(CommandError::Number(_)));
        assert_matches!(parse_line("teleport"), Err(CommandError::Unknown(_)));
    }

    #[test]
    fn removal_and_viewport() {
        assert_eq!(intents("remove-detection 3"), vec![Intent::RemoveDetection(3)]);
        assert_eq!(intents("remove-rect 7"), vec![Intent::RemoveManual(7)]);
        assert_eq!(
            intents("viewport 640 480"),
            vec![Intent::SetViewport(Size::new(640.0, 480.0))]
        );
    }
}
