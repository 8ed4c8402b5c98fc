//! Scenario runner: drives a scenario's steps one at a time over a session.
//!
//! Each step walks the same states: `Idle` takes the next step and sends it,
//! `StepInFlight` waits for the correlator, `StepResolved` records the outcome
//! and applies the failure policy, and `ScenarioDone` returns the result. A new
//! step is never sent while the previous one is unresolved.

use crate::actions;
use crate::correlator::{self, MismatchReport, PendingExpectation, Resolution};
use crate::error::{StepError, TransportError};
use crate::event::Event;
use crate::scenario::{FailurePolicy, Scenario, Step};
use crate::session::Session;
use crate::transport::Transport;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// How a single step ended.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The expected reply arrived. `None` for steps that expect no reply.
    Matched(Option<Event>),
    TimedOut(MismatchReport),
    Errored(StepError),
    Cancelled,
    /// Never sent because an earlier step ended the scenario.
    Skipped,
}

impl StepOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, StepOutcome::Matched(_))
    }

    /// The matched event, if any.
    pub fn event(&self) -> Option<&Event> {
        match self {
            StepOutcome::Matched(event) => event.as_ref(),
            _ => None,
        }
    }

    /// The outcome to record for the steps after this one, or `None` to keep
    /// running.
    fn halt(&self, policy: FailurePolicy) -> Option<StepOutcome> {
        match self {
            StepOutcome::Matched(_) | StepOutcome::Skipped => None,
            StepOutcome::Errored(StepError::Transport(err)) => {
                Some(StepOutcome::Errored(StepError::Transport(err.clone())))
            }
            StepOutcome::Cancelled => Some(StepOutcome::Skipped),
            StepOutcome::TimedOut(_) | StepOutcome::Errored(StepError::ButtonNotFound { .. }) => {
                match policy {
                    FailurePolicy::FailFast => Some(StepOutcome::Skipped),
                    FailurePolicy::ContinueOnFailure => None,
                }
            }
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Matched(Some(event)) => write!(f, "matched {event}"),
            StepOutcome::Matched(None) => f.write_str("sent"),
            StepOutcome::TimedOut(report) => write!(
                f,
                "timed out after {:?} waiting for {} ({} unmatched events)",
                report.waited,
                report.expected,
                report.noise.len()
            ),
            StepOutcome::Errored(err) => write!(f, "errored: {err}"),
            StepOutcome::Cancelled => f.write_str("cancelled"),
            StepOutcome::Skipped => f.write_str("skipped"),
        }
    }
}

/// The outcome of one step, with the step it belongs to.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub index: usize,
    pub step: Step,
    pub outcome: StepOutcome,
    /// From the start of sending to resolution. Zero for steps never sent.
    pub elapsed: Duration,
}

/// Per-step outcomes of one scenario run, in step order.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario: String,
    pub steps: Vec<StepReport>,
}

impl ScenarioResult {
    /// True when every step matched. An empty scenario passes.
    pub fn passed(&self) -> bool {
        self.steps.iter().all(|r| r.outcome.is_matched())
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().map(|r| &r.outcome)
    }

    /// Steps that were run and did not match.
    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|r| !matches!(r.outcome, StepOutcome::Matched(_) | StepOutcome::Skipped))
    }

    /// The transport error that aborted the run, if one did.
    pub fn transport_error(&self) -> Option<&TransportError> {
        self.outcomes().find_map(|o| match o {
            StepOutcome::Errored(StepError::Transport(err)) => Some(err),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

enum RunnerState {
    Idle,
    StepInFlight {
        pending: PendingExpectation,
        started: Instant,
    },
    StepResolved {
        outcome: StepOutcome,
        started: Instant,
    },
    ScenarioDone,
}

/// Runs scenarios against one session.
///
/// Holding the session mutably for the duration of a run guarantees a single
/// conversation per chat. Cancelling the runner's token resolves the step in
/// flight as [`StepOutcome::Cancelled`] and skips the rest.
pub struct ScenarioRunner<'s, T: Transport + ?Sized = dyn Transport> {
    session: &'s mut Session<T>,
    cancel: CancellationToken,
}

impl<'s, T: Transport + ?Sized> ScenarioRunner<'s, T> {
    pub fn new(session: &'s mut Session<T>) -> Self {
        Self {
            session,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels the current and future runs of this runner.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute `scenario` to completion and return every step's outcome.
    ///
    /// Never retries: a failed scenario is rerun by the caller, ideally with a
    /// fresh session.
    #[instrument(skip_all, fields(scenario = %scenario.name))]
    pub async fn run(&mut self, scenario: &Scenario) -> ScenarioResult {
        let mut reports: Vec<StepReport> = Vec::with_capacity(scenario.steps.len());
        let mut state = RunnerState::Idle;

        loop {
            state = match state {
                RunnerState::Idle => {
                    let index = reports.len();
                    match scenario.steps.get(index) {
                        None => RunnerState::ScenarioDone,
                        Some(_) if self.cancel.is_cancelled() => {
                            warn!("cancelled before step {}", index + 1);
                            skip_rest(&mut reports, scenario, StepOutcome::Skipped);
                            RunnerState::ScenarioDone
                        }
                        Some(step) => {
                            match &step.label {
                                Some(label) => info!(
                                    step = index + 1,
                                    "=== Step {} [{}]: {} ===",
                                    index + 1,
                                    label,
                                    step
                                ),
                                None => info!(step = index + 1, "=== Step {}: {} ===", index + 1, step),
                            }
                            self.dispatch(step).await
                        }
                    }
                }

                RunnerState::StepInFlight { pending, started } => {
                    let resolution =
                        correlator::await_match(pending, self.session.events_mut(), &self.cancel)
                            .await;
                    let outcome = match resolution {
                        Resolution::Matched(event) => StepOutcome::Matched(Some(event)),
                        Resolution::TimedOut(report) => StepOutcome::TimedOut(report),
                        Resolution::Cancelled => StepOutcome::Cancelled,
                        Resolution::Failed(err) => StepOutcome::Errored(err.into()),
                    };
                    RunnerState::StepResolved { outcome, started }
                }

                RunnerState::StepResolved { outcome, started } => {
                    let index = reports.len();
                    let halt = outcome.halt(scenario.policy);
                    info!(step = index + 1, outcome = %outcome, "step resolved");
                    reports.push(StepReport {
                        index,
                        step: scenario.steps[index].clone(),
                        outcome,
                        elapsed: started.elapsed(),
                    });
                    match halt {
                        Some(rest) => {
                            skip_rest(&mut reports, scenario, rest);
                            RunnerState::ScenarioDone
                        }
                        None => RunnerState::Idle,
                    }
                }

                RunnerState::ScenarioDone => break,
            };
        }

        let result = ScenarioResult {
            scenario: scenario.name.clone(),
            steps: reports,
        };
        info!(
            passed = result.passed(),
            failures = result.failures().count(),
            "scenario finished"
        );
        result
    }

    async fn dispatch(&mut self, step: &Step) -> RunnerState {
        let started = Instant::now();
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            sent = actions::send(&mut *self.session, step) => Some(sent),
        };
        match sent {
            None => RunnerState::StepResolved {
                outcome: StepOutcome::Cancelled,
                started,
            },
            Some(Err(err)) => RunnerState::StepResolved {
                outcome: StepOutcome::Errored(err),
                started,
            },
            Some(Ok(None)) => RunnerState::StepResolved {
                outcome: StepOutcome::Matched(None),
                started,
            },
            Some(Ok(Some(pending))) => RunnerState::StepInFlight { pending, started },
        }
    }
}

/// Record every step after the last report with `outcome`.
fn skip_rest(reports: &mut Vec<StepReport>, scenario: &Scenario, outcome: StepOutcome) {
    let start = reports.len();
    for (index, step) in scenario.steps.iter().enumerate().skip(start) {
        reports.push(StepReport {
            index,
            step: step.clone(),
            outcome: outcome.clone(),
            elapsed: Duration::ZERO,
        });
    }
}
