//! Declarative display steps.
//!
//! Scripts arrive as json (config file, `POST /lcd`), one object per step:
//!
//! ```json
//! [
//!   {"action": "on"},
//!   {"action": "write", "clear": true, "color": [0, 0, 255], "text": "Smile!"},
//!   {"action": "wait", "time": 1000},
//!   {"action": "loop", "param": {"loops": 3, "interval": 1000, "reversed": true,
//!                                "action": "write", "clear": true, "text": "%d..."}}
//! ]
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const VALID_ACTIONS: [&str; 7] = ["on", "off", "write", "clear", "loop", "color", "wait"];

#[derive(Error, Debug)]
pub enum StepError {
    #[error("unknown action '{0}'")]
    UnrecognizedAction(String),
    #[error("invalid loop action: {0}")]
    MalformedLoopSpec(String),
    #[error("invalid '{action}' step: {source}")]
    Invalid {
        action: &'static str,
        source: serde_json::Error,
    },
}

/// backlight color, `[r, g, b]` in json
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct WriteStep {
    #[serde(default)]
    pub text: Option<String>,
    /// clear the screen and home the cursor first
    #[serde(default)]
    pub clear: bool,
    #[serde(default)]
    pub color: Option<Rgb>,
    /// `[row, col]` to move to before writing
    #[serde(default)]
    pub cursor: Option<(u8, u8)>,
    #[serde(default)]
    pub raw: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSpec {
    pub count: u32,
    pub interval: Duration,
    /// count down from `count` to 1 instead of up
    pub reversed: bool,
    /// never a `wait` or another `loop`
    pub action: Box<DisplayStep>,
}

impl LoopSpec {
    /// iteration numbers in the order they are shown
    pub fn iterations(&self) -> Box<dyn Iterator<Item = u32> + Send> {
        if self.reversed {
            Box::new((1..=self.count).rev())
        } else {
            Box::new(1..=self.count)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayStep {
    On,
    Off,
    Write(WriteStep),
    Clear,
    Color(Rgb),
    Wait(Duration),
    Loop(LoopSpec),
}

#[derive(Deserialize)]
struct ColorFields {
    color: Rgb,
}

#[derive(Deserialize)]
struct WaitFields {
    /// milliseconds
    time: u64,
}

#[derive(Deserialize)]
struct LoopFields {
    loops: u32,
    interval: u64,
    #[serde(default)]
    reversed: bool,
}

fn fields<T: for<'de> Deserialize<'de>>(
    action: &'static str,
    value: &Value,
) -> Result<T, StepError> {
    T::deserialize(value).map_err(|source| StepError::Invalid { action, source })
}

impl DisplayStep {
    #[cfg(test)]
    pub fn text(text: impl Into<String>) -> Self {
        DisplayStep::Write(WriteStep { text: Some(text.into()), ..WriteStep::default() })
    }

    pub fn from_value(value: &Value) -> Result<Self, StepError> {
        let action = value.get("action").and_then(Value::as_str).unwrap_or_default();
        match action {
            "on" => Ok(DisplayStep::On),
            "off" => Ok(DisplayStep::Off),
            "clear" => Ok(DisplayStep::Clear),
            "write" => Ok(DisplayStep::Write(fields("write", value)?)),
            "color" => fields::<ColorFields>("color", value).map(|f| DisplayStep::Color(f.color)),
            "wait" => fields::<WaitFields>("wait", value)
                .map(|f| DisplayStep::Wait(Duration::from_millis(f.time))),
            "loop" => LoopSpec::from_param(value.get("param")).map(DisplayStep::Loop),
            other => Err(StepError::UnrecognizedAction(other.to_string())),
        }
    }

    /// substitute the iteration number into the first `%d` of the text
    pub fn with_iteration(&self, i: u32) -> DisplayStep {
        match self {
            DisplayStep::Write(w) => DisplayStep::Write(WriteStep {
                text: w.text.as_ref().map(|t| t.replacen("%d", &i.to_string(), 1)),
                ..w.clone()
            }),
            other => other.clone(),
        }
    }
}

impl LoopSpec {
    fn from_param(param: Option<&Value>) -> Result<Self, StepError> {
        let param = param.ok_or_else(|| StepError::MalformedLoopSpec("missing param".into()))?;
        let LoopFields { loops, interval, reversed } = LoopFields::deserialize(param)
            .map_err(|e| StepError::MalformedLoopSpec(e.to_string()))?;
        if loops == 0 || interval == 0 {
            return Err(StepError::MalformedLoopSpec(format!("loops={loops} interval={interval}")));
        }
        let action = match DisplayStep::from_value(param)? {
            DisplayStep::Wait(_) | DisplayStep::Loop(_) => {
                return Err(StepError::MalformedLoopSpec("nested action must not be timed".into()))
            }
            step => step,
        };
        Ok(Self {
            count: loops,
            interval: Duration::from_millis(interval),
            reversed,
            action: Box::new(action),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_write() {
        let step = DisplayStep::from_value(&json!({
            "action": "write", "clear": true, "color": [255, 0, 0], "cursor": [1, 4], "text": "GO"
        }))
        .unwrap();
        assert_eq!(
            step,
            DisplayStep::Write(WriteStep {
                text: Some("GO".into()),
                clear: true,
                color: Some(Rgb(255, 0, 0)),
                cursor: Some((1, 4)),
                raw: false,
            })
        );
    }

    #[test]
    fn test_parse_simple_actions() {
        assert_eq!(DisplayStep::from_value(&json!({"action": "on"})).unwrap(), DisplayStep::On);
        assert_eq!(
            DisplayStep::from_value(&json!({"action": "wait", "time": 250})).unwrap(),
            DisplayStep::Wait(Duration::from_millis(250))
        );
        assert_eq!(
            DisplayStep::from_value(&json!({"action": "color", "color": [1, 2, 3]})).unwrap(),
            DisplayStep::Color(Rgb(1, 2, 3))
        );
    }

    #[test]
    fn test_unknown_and_missing_action() {
        assert!(matches!(
            DisplayStep::from_value(&json!({"action": "dance"})),
            Err(StepError::UnrecognizedAction(a)) if a == "dance"
        ));
        assert!(matches!(
            DisplayStep::from_value(&json!({"text": "hi"})),
            Err(StepError::UnrecognizedAction(a)) if a.is_empty()
        ));
    }

    #[test]
    fn test_parse_loop() {
        let step = DisplayStep::from_value(&json!({
            "action": "loop",
            "param": {"loops": 3, "interval": 1000, "reversed": true, "action": "write", "text": "%d..."}
        }))
        .unwrap();
        let DisplayStep::Loop(spec) = step else { panic!("expected loop") };
        assert_eq!(spec.count, 3);
        assert_eq!(spec.interval, Duration::from_secs(1));
        assert_eq!(spec.iterations().collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(spec.action.with_iteration(2), DisplayStep::text("2..."));
    }

    #[test]
    fn test_malformed_loops() {
        for bad in [
            json!({"action": "loop"}),
            json!({"action": "loop", "param": {"loops": 0, "interval": 10, "action": "clear"}}),
            json!({"action": "loop", "param": {"loops": 2, "action": "clear"}}),
            json!({"action": "loop", "param": {"loops": 2, "interval": 10, "action": "wait", "time": 5}}),
        ] {
            assert!(
                matches!(DisplayStep::from_value(&bad), Err(StepError::MalformedLoopSpec(_))),
                "{bad}"
            );
        }
        assert!(matches!(
            DisplayStep::from_value(&json!({"action": "loop", "param": {"loops": 2, "interval": 10, "action": "spin"}})),
            Err(StepError::UnrecognizedAction(_))
        ));
    }

    #[test]
    fn test_iteration_substitutes_first_placeholder_only() {
        let step = DisplayStep::text("%d of %d");
        assert_eq!(step.with_iteration(1), DisplayStep::text("1 of %d"));
        assert_eq!(DisplayStep::Clear.with_iteration(4), DisplayStep::Clear);
    }
}
