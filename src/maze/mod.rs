//! Stuck detection for the maze game caller.
//!
//! The game reports the player position with every request. When the last
//! few reports are identical the player is stuck, and a deterministic
//! directional hint is produced locally instead of burning an inference
//! call on it. Position history is bounded per session.

use std::collections::{HashMap, VecDeque};

pub type Position = (i64, i64);

/// Hint used when the game sends a position we cannot parse.
pub const GENERIC_HINT: &str =
    "I couldn't read your position. Try moving in any direction to explore the maze.";

/// System instruction bound to maze sessions.
pub const MAZE_SYSTEM_PROMPT: &str = "\
You are a maze game assistant. The player moves on a grid and asks for help \
reaching the exit. Reply with one short, encouraging hint about where to go \
next. When an obstacle blocks the way, call the provided game functions \
(break walls, speed boosts, teleports) instead of describing them in text.";

/// Parse a `[x, y]` JSON array into a position.
pub fn parse_position(value: &serde_json::Value) -> Option<Position> {
    let items = value.as_array()?;
    if items.len() != 2 {
        return None;
    }
    Some((items[0].as_i64()?, items[1].as_i64()?))
}

pub struct StuckDetector {
    /// Consecutive identical positions that count as stuck.
    threshold: usize,
    /// Positions remembered per session.
    history_len: usize,
    positions: parking_lot::Mutex<HashMap<String, VecDeque<Position>>>,
}

impl StuckDetector {
    pub fn new(threshold: usize, history_len: usize) -> Self {
        Self {
            threshold: threshold.max(2),
            history_len: history_len.max(2),
            positions: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Record a position report and decide whether to short-circuit
    /// inference with a local hint.
    pub fn check(&self, session_id: &str, position: Position, exit: Position) -> Option<String> {
        let mut map = self.positions.lock();
        let history = map.entry(session_id.to_string()).or_default();
        history.push_back(position);
        while history.len() > self.history_len {
            history.pop_front();
        }

        if position == exit {
            return Some(format!(
                "You reached the exit at ({}, {})! Well done.",
                exit.0, exit.1
            ));
        }

        if history.len() < self.threshold {
            return None;
        }

        let stuck = history
            .iter()
            .rev()
            .take(self.threshold)
            .all(|p| *p == position);
        if !stuck {
            return None;
        }

        Some(directional_hint(position, exit))
    }

    /// Forget a session's position history.
    pub fn reset(&self, session_id: &str) {
        self.positions.lock().remove(session_id);
    }

    #[cfg(test)]
    fn history_len_of(&self, session_id: &str) -> usize {
        self.positions
            .lock()
            .get(session_id)
            .map_or(0, VecDeque::len)
    }
}

fn directional_hint(current: Position, exit: Position) -> String {
    let mut directions = Vec::new();
    if exit.0 > current.0 {
        directions.push("RIGHT");
    } else if exit.0 < current.0 {
        directions.push("LEFT");
    }
    if exit.1 > current.1 {
        directions.push("DOWN");
    } else if exit.1 < current.1 {
        directions.push("UP");
    }

    let movement = match directions.as_slice() {
        [] => "around".to_string(),
        [only] => (*only).to_string(),
        [first, second] => format!("{first} and {second}"),
        _ => unreachable!(),
    };

    format!(
        "You seem stuck at ({}, {}). Try moving {movement} toward the exit at ({}, {}).",
        current.0, current.1, exit.0, exit.1
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXIT: Position = (8, 8);

    #[test]
    fn repeated_position_triggers_directional_hint() {
        let detector = StuckDetector::new(3, 10);
        assert!(detector.check("s1", (3, 1), EXIT).is_none());
        assert!(detector.check("s1", (3, 1), EXIT).is_none());

        let hint = detector.check("s1", (3, 1), EXIT).unwrap();
        assert!(hint.contains("RIGHT"));
        assert!(hint.contains("DOWN"));
        assert!(hint.contains("(8, 8)"));
    }

    #[test]
    fn oscillating_positions_are_not_stuck() {
        let detector = StuckDetector::new(3, 10);
        assert!(detector.check("s1", (3, 1), EXIT).is_none());
        assert!(detector.check("s1", (3, 2), EXIT).is_none());
        assert!(detector.check("s1", (3, 1), EXIT).is_none());
    }

    #[test]
    fn reaching_the_exit_is_announced_immediately() {
        let detector = StuckDetector::new(3, 10);
        let hint = detector.check("s1", (8, 8), EXIT).unwrap();
        assert!(hint.contains("reached the exit"));
        assert!(hint.contains("(8, 8)"));
    }

    #[test]
    fn hint_is_deterministic() {
        let detector = StuckDetector::new(3, 10);
        for _ in 0..2 {
            detector.check("s1", (3, 1), EXIT);
        }
        let first = detector.check("s1", (3, 1), EXIT).unwrap();
        let second = detector.check("s1", (3, 1), EXIT).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn directions_follow_exit_location() {
        assert!(directional_hint((8, 8), (1, 1)).contains("LEFT and UP"));
        assert!(directional_hint((1, 8), (8, 8)).contains("RIGHT"));
        assert!(!directional_hint((1, 8), (8, 8)).contains("DOWN"));
        assert!(directional_hint((4, 1), (4, 9)).contains("DOWN"));
    }

    #[test]
    fn history_is_bounded() {
        let detector = StuckDetector::new(3, 10);
        for i in 0..50 {
            detector.check("s1", (i, i + 1), (100, 100));
        }
        assert_eq!(detector.history_len_of("s1"), 10);
    }

    #[test]
    fn sessions_are_isolated() {
        let detector = StuckDetector::new(3, 10);
        detector.check("s1", (3, 1), EXIT);
        detector.check("s1", (3, 1), EXIT);
        // A different player at the same spot is not yet stuck.
        assert!(detector.check("s2", (3, 1), EXIT).is_none());
    }

    #[test]
    fn reset_forgets_history() {
        let detector = StuckDetector::new(3, 10);
        detector.check("s1", (3, 1), EXIT);
        detector.check("s1", (3, 1), EXIT);
        detector.reset("s1");
        assert!(detector.check("s1", (3, 1), EXIT).is_none());
    }

    #[test]
    fn parse_position_accepts_coordinate_pair() {
        assert_eq!(parse_position(&serde_json::json!([3, 1])), Some((3, 1)));
    }

    #[test]
    fn parse_position_rejects_malformed_input() {
        assert_eq!(parse_position(&serde_json::json!("3,1")), None);
        assert_eq!(parse_position(&serde_json::json!([3])), None);
        assert_eq!(parse_position(&serde_json::json!([3, 1, 4])), None);
        assert_eq!(parse_position(&serde_json::json!([3.5, 1.2])), None);
        assert_eq!(parse_position(&serde_json::json!(null)), None);
    }
}
