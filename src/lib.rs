//! # botdialog
//!
//! A scripted dialog engine for end-to-end testing of Telegram bots.
//!
//! botdialog drives a bot from a real user account: it sends messages,
//! commands and button taps into the chat, waits for the bot's replies,
//! matches each reply against what the step expects, and reports a verdict per
//! step. The MTProto client is supplied by the caller through the
//! [`Transport`] trait; botdialog never logs in or reconnects on its own.
//!
//! ## Quick start
//!
//! ```no_run
//! use botdialog::{ChatRef, Scenario, ScenarioRunner, Session, Step, Transport};
//! use std::sync::Arc;
//!
//! async fn check_signup(transport: Arc<dyn Transport>) -> anyhow::Result<()> {
//!     let mut session = Session::open(transport, ChatRef::new("shop_bot")).await?;
//!
//!     let scenario = Scenario::new("signup")
//!         .step(Step::command("start").expect_buttons(["Sign up", "Help"]))
//!         .step(Step::tap("Sign up").expect_text("Your name?"))
//!         .step(Step::send_text("Ada").expect_text("Welcome, Ada"));
//!
//!     let result = ScenarioRunner::new(&mut session).run(&scenario).await;
//!     for report in &result.steps {
//!         println!("{}: {}", report.step, report.outcome);
//!     }
//!     anyhow::ensure!(result.passed(), "scenario failed");
//!     Ok(())
//! }
//! ```
//!
//! ## Scripts
//!
//! Scenarios can also be written as scripts and loaded with [`parse_str`] or
//! [`parse_file`]:
//!
//! | Line | Meaning |
//! |------|---------|
//! | `scenario "name"` | Name the scenario |
//! | `policy continue` | Keep running after a failed step (default `fail-fast`) |
//! | `send "text"` | Send a plain message |
//! | `command start` | Send `/start` |
//! | `tap "Label"` | Press a button on the last keyboard the bot showed |
//! | `expect text "needle" 5s` | Wait up to 5 seconds for a message containing `needle` |
//! | `expect buttons "A" "B"` | Wait for a keyboard with exactly these labels |
//! | `expect any` | Wait for any reply (the default) |
//! | `expect nothing` | Do not wait for a reply |
//! | `timeout 10s` | Timeout of the preceding step |
//! | `# comment` | Full-line or inline comment |
//!
//! ## Outcomes
//!
//! Every step ends as exactly one of [`StepOutcome`]'s variants: `Matched`,
//! `TimedOut` (with the unmatched events seen while waiting), `Errored`,
//! `Cancelled` or `Skipped`. A timeout or step error stops the scenario unless
//! it runs with [`FailurePolicy::ContinueOnFailure`]; a transport error always
//! stops it.

pub mod actions;
pub mod config;
pub mod correlator;
pub mod error;
pub mod event;
pub mod listener;
pub mod logging;
pub mod matcher;
pub mod pacing;
pub mod parser;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod transport;

pub use correlator::{MismatchReport, PendingExpectation, Resolution};
pub use error::{StepError, TransportError, TransportResult};
pub use event::{Button, ButtonLayout, Event, EventKind, LabelMatch};
pub use listener::EventStream;
pub use matcher::{Expect, Matcher};
pub use pacing::{Pacer, PacingConfig};
pub use parser::{ScriptParser, parse_file, parse_str};
pub use runner::{ScenarioResult, ScenarioRunner, StepOutcome, StepReport};
pub use scenario::{DEFAULT_STEP_TIMEOUT, FailurePolicy, Scenario, Step, StepKind};
pub use session::Session;
pub use transport::{ChatRef, MessageId, Transport};
