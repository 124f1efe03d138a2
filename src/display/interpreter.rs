//! Runs display step lists against a `Display`.
//!
//! Steps run strictly in order. `wait` and `loop` are the only suspension
//! points. Taking `&mut self` for a whole script means a second loop can
//! never start while one is still ticking.

use super::step::{DisplayStep, LoopSpec, VALID_ACTIONS};
use super::Display;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("display script is not a list of steps")]
    NotAList,
    #[error("display driver error: {0:#}")]
    Display(anyhow::Error),
}

pub struct StepInterpreter {
    display: Box<dyn Display>,
}

impl StepInterpreter {
    pub fn new(display: Box<dyn Display>) -> Self {
        Self { display }
    }

    pub fn display_mut(&mut self) -> &mut dyn Display {
        self.display.as_mut()
    }

    /// run an untyped script; bad steps are logged and skipped
    pub async fn execute_json(&mut self, script: &Value) -> Result<(), ScriptError> {
        let steps = script.as_array().ok_or(ScriptError::NotAList)?;
        for (index, raw) in steps.iter().enumerate() {
            match DisplayStep::from_value(raw) {
                Ok(step) => self.run(&step).await?,
                Err(e) => {
                    let valid = VALID_ACTIONS.join(", ");
                    warn!(index, error = %e, %valid, "skipping display step")
                }
            }
        }
        Ok(())
    }

    pub async fn execute(&mut self, steps: &[DisplayStep]) -> Result<(), ScriptError> {
        for step in steps {
            self.run(step).await?;
        }
        Ok(())
    }

    async fn run(&mut self, step: &DisplayStep) -> Result<(), ScriptError> {
        match step {
            DisplayStep::Wait(duration) => tokio::time::sleep(*duration).await,
            DisplayStep::Loop(spec) => self.run_loop(spec).await?,
            other => self.apply(other).map_err(ScriptError::Display)?,
        }
        Ok(())
    }

    /// one iteration per interval tick, then one more tick before returning
    async fn run_loop(&mut self, spec: &LoopSpec) -> Result<(), ScriptError> {
        let mut ticker = interval_at(Instant::now() + spec.interval, spec.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        for i in spec.iterations() {
            ticker.tick().await;
            debug!(i, "display loop");
            self.apply(&spec.action.with_iteration(i)).map_err(ScriptError::Display)?;
        }
        ticker.tick().await;
        Ok(())
    }

    fn apply(&mut self, step: &DisplayStep) -> anyhow::Result<()> {
        let d = self.display.as_mut();
        match step {
            DisplayStep::On => d.power_on()?,
            DisplayStep::Off => {
                d.set_color(0, 0, 0)?;
                d.power_off()?;
            }
            DisplayStep::Clear => {
                d.clear()?;
                d.set_cursor(0, 0)?;
            }
            DisplayStep::Color(c) => d.set_color(c.0, c.1, c.2)?,
            DisplayStep::Write(w) => {
                if w.clear {
                    d.clear()?;
                    d.set_cursor(0, 0)?;
                }
                if let Some(c) = w.color {
                    d.set_color(c.0, c.1, c.2)?;
                }
                if let Some((row, col)) = w.cursor {
                    d.set_cursor(row, col)?;
                }
                if let Some(text) = &w.text {
                    d.set_text(text, w.raw)?;
                }
            }
            // timed steps are handled by run()
            DisplayStep::Wait(_) | DisplayStep::Loop(_) => {}
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Op, RecordingDisplay};
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn interpreter() -> (StepInterpreter, RecordingDisplay) {
        let display = RecordingDisplay::default();
        (StepInterpreter::new(Box::new(display.clone())), display)
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_wait_clear_in_order() {
        let (mut interp, display) = interpreter();
        let started = Instant::now();
        interp
            .execute_json(&json!([
                {"action": "write", "text": "A"},
                {"action": "wait", "time": 10},
                {"action": "clear"}
            ]))
            .await
            .unwrap();

        let timed = display.timed();
        let ops: Vec<Op> = timed.iter().map(|(_, op)| op.clone()).collect();
        assert_eq!(ops, vec![Op::Text("A".into()), Op::Clear, Op::Cursor(0, 0)]);
        assert_eq!(timed[0].0, started);
        assert!(timed[1].0 - timed[0].0 >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_action_is_skipped() {
        let (mut interp, display) = interpreter();
        interp
            .execute_json(&json!([{"action": "dance"}, {"action": "write", "text": "B"}]))
            .await
            .unwrap();
        assert_eq!(display.ops(), vec![Op::Text("B".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_loop_is_skipped() {
        let (mut interp, display) = interpreter();
        interp
            .execute_json(&json!([
                {"action": "loop", "param": {"loops": 0, "interval": 100, "action": "clear"}},
                {"action": "on"}
            ]))
            .await
            .unwrap();
        assert_eq!(display.ops(), vec![Op::On]);
    }

    #[tokio::test]
    async fn test_not_a_list_fails() {
        let (mut interp, display) = interpreter();
        let err = interp.execute_json(&json!({"action": "on"})).await.unwrap_err();
        assert!(matches!(err, ScriptError::NotAList));
        assert!(display.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_loop_timing() {
        let (mut interp, display) = interpreter();
        let started = Instant::now();
        interp
            .execute_json(&json!([{
                "action": "loop",
                "param": {"loops": 3, "interval": 100, "reversed": true, "action": "write", "text": "%d..."}
            }]))
            .await
            .unwrap();

        let timed = display.timed();
        let texts: Vec<(u64, Op)> = timed
            .iter()
            .map(|(at, op)| ((*at - started).as_millis() as u64, op.clone()))
            .collect();
        assert_eq!(
            texts,
            vec![
                (100, Op::Text("3...".into())),
                (200, Op::Text("2...".into())),
                (300, Op::Text("1...".into())),
            ]
        );
        // resolves one interval after the last iteration
        assert_eq!(Instant::now() - started, Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_counts_up_by_default() {
        let (mut interp, display) = interpreter();
        let started = Instant::now();
        interp
            .execute_json(&json!([{
                "action": "loop",
                "param": {"loops": 3, "interval": 100, "action": "write", "text": "%d"}
            }]))
            .await
            .unwrap();

        let texts: Vec<(u64, Op)> = display
            .timed()
            .iter()
            .map(|(at, op)| ((*at - started).as_millis() as u64, op.clone()))
            .collect();
        assert_eq!(
            texts,
            vec![
                (100, Op::Text("1".into())),
                (200, Op::Text("2".into())),
                (300, Op::Text("3".into())),
            ]
        );
    }

    #[tokio::test]
    async fn test_write_with_clear_and_color() {
        let (mut interp, display) = interpreter();
        interp
            .execute_json(&json!([
                {"action": "write", "clear": true, "color": [0, 255, 0], "cursor": [1, 2], "text": "OK"},
                {"action": "off"}
            ]))
            .await
            .unwrap();
        assert_eq!(
            display.ops(),
            vec![
                Op::Clear,
                Op::Cursor(0, 0),
                Op::Color(0, 255, 0),
                Op::Cursor(1, 2),
                Op::Text("OK".into()),
                Op::Color(0, 0, 0),
                Op::Off,
            ]
        );
    }

    #[tokio::test]
    async fn test_driver_error_aborts_script() {
        let display = RecordingDisplay { fail: true, ..RecordingDisplay::default() };
        let mut interp = StepInterpreter::new(Box::new(display));
        let err = interp.execute(&[DisplayStep::On]).await.unwrap_err();
        assert!(matches!(err, ScriptError::Display(_)));
    }
}
