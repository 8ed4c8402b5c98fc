//! Scenario definitions: ordered steps plus a failure policy.
//!
//! Scenarios are plain data. They can be built in code with the helpers below
//! or loaded from a script with [`crate::parser`].

use crate::actions::format_command;
use crate::matcher::{Expect, Matcher};
use std::fmt;
use std::time::Duration;

/// Timeout applied to steps that do not set their own.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(20);

/// The user-side action a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    SendText,
    TapButton,
    /// Sent as a slash-prefixed text message.
    SendCommand,
}

/// One scripted action and the reply it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    /// Message text, button label, or command name depending on `kind`.
    pub payload: String,
    pub expect: Expect,
    pub timeout: Duration,
    /// Human-readable label for logs and reports.
    pub label: Option<String>,
}

impl Step {
    fn new(kind: StepKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            expect: Expect::default(),
            timeout: DEFAULT_STEP_TIMEOUT,
            label: None,
        }
    }

    /// Send `text` as a plain message.
    pub fn send_text(text: impl Into<String>) -> Self {
        Self::new(StepKind::SendText, text)
    }

    /// Press the button labelled `label` on the last keyboard the bot showed.
    pub fn tap(label: impl Into<String>) -> Self {
        Self::new(StepKind::TapButton, label)
    }

    /// Send `/name`. Arguments may follow the name: `Step::command("start ref42")`.
    pub fn command(name: impl Into<String>) -> Self {
        Self::new(StepKind::SendCommand, name)
    }

    pub fn expect(mut self, expect: Expect) -> Self {
        self.expect = expect;
        self
    }

    pub fn expect_text(self, needle: impl Into<String>) -> Self {
        self.expect(Expect::Reply(Matcher::text_contains(needle)))
    }

    pub fn expect_buttons<I, S>(self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expect(Expect::Reply(Matcher::buttons(labels)))
    }

    pub fn expect_any(self) -> Self {
        self.expect(Expect::Reply(Matcher::Any))
    }

    /// Succeed as soon as the action is sent, without waiting for a reply.
    pub fn expect_no_reply(self) -> Self {
        self.expect(Expect::NoReply)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StepKind::SendText => write!(f, "send {:?}", self.payload)?,
            StepKind::TapButton => write!(f, "tap {:?}", self.payload)?,
            StepKind::SendCommand => write!(f, "command {}", format_command(&self.payload))?,
        }
        match &self.expect {
            Expect::NoReply => write!(f, ", expect no reply"),
            Expect::Reply(matcher) => write!(
                f,
                ", expect {} within {:?}",
                matcher, self.timeout
            ),
        }
    }
}

/// What the runner does after a step times out or errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop and mark the remaining steps skipped.
    #[default]
    FailFast,
    /// Keep going, so one run can surface several independent failures.
    ContinueOnFailure,
}

/// A named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<Step>,
    pub policy: FailurePolicy,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.policy = FailurePolicy::ContinueOnFailure;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_defaults() {
        let step = Step::send_text("hi");
        assert_eq!(step.kind, StepKind::SendText);
        assert_eq!(step.expect, Expect::Reply(Matcher::Any));
        assert_eq!(step.timeout, DEFAULT_STEP_TIMEOUT);
    }

    #[test]
    fn test_step_builders() {
        let step = Step::tap("Yes")
            .expect_buttons(["Done"])
            .timeout(Duration::from_secs(3))
            .label("confirm");
        assert_eq!(step.kind, StepKind::TapButton);
        assert_eq!(step.expect, Expect::Reply(Matcher::buttons(["Done"])));
        assert_eq!(step.timeout, Duration::from_secs(3));
        assert_eq!(step.label.as_deref(), Some("confirm"));
    }

    #[test]
    fn test_display() {
        let step = Step::command("start").expect_text("Hi").timeout(Duration::from_secs(5));
        assert_eq!(step.to_string(), "command /start, expect text contains \"Hi\" within 5s");
        assert_eq!(
            Step::send_text("bye").expect_no_reply().to_string(),
            "send \"bye\", expect no reply"
        );
    }

    #[test]
    fn test_command_display_matches_sent_text() {
        let step = Step::command(" /start ref42 ").expect_no_reply();
        assert_eq!(step.to_string(), "command /start ref42, expect no reply");
    }

    #[test]
    fn test_scenario_policy() {
        let scenario = Scenario::new("flow").step(Step::send_text("a"));
        assert_eq!(scenario.policy, FailurePolicy::FailFast);
        assert_eq!(scenario.continue_on_failure().policy, FailurePolicy::ContinueOnFailure);
    }
}
