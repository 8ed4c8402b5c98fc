use botdialog::transport::memory::{BotHandle, InMemoryTransport, UserAction};
use botdialog::{
    ChatRef, EventKind, LabelMatch, Pacer, PacingConfig, Scenario, ScenarioRunner, Session, Step, StepError,
    StepOutcome, TransportError, parse_str,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

async fn open(transport: &InMemoryTransport) -> Session<InMemoryTransport> {
    Session::open(Arc::new(transport.clone()), ChatRef::new("test_bot"))
        .await
        .unwrap()
}

/// A bot that answers known texts with a fixed reply and ignores the rest.
/// Resolves to every text it received once the transport is dropped.
fn spawn_replier(
    mut bot: BotHandle,
    replies: &'static [(&'static str, &'static str)],
) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(action) = bot.next_action().await {
            let text = action.text();
            if let Some((_, reply)) = replies.iter().find(|(input, _)| *input == text) {
                bot.reply(reply).await;
            }
            seen.push(text);
        }
        seen
    })
}

fn kinds(outcomes: impl Iterator<Item = StepOutcome>) -> Vec<&'static str> {
    outcomes
        .map(|o| match o {
            StepOutcome::Matched(_) => "matched",
            StepOutcome::TimedOut(_) => "timed-out",
            StepOutcome::Errored(_) => "errored",
            StepOutcome::Cancelled => "cancelled",
            StepOutcome::Skipped => "skipped",
        })
        .collect()
}

fn abc_scenario() -> Scenario {
    Scenario::new("abc")
        .step(Step::send_text("a").expect_text("A!"))
        .step(
            Step::send_text("b")
                .expect_text("B!")
                .timeout(Duration::from_secs(2)),
        )
        .step(Step::send_text("c").expect_text("C!"))
}

const ABC_BOT: &[(&str, &str)] = &[("a", "A!"), ("c", "C!")];

#[tokio::test(start_paused = true)]
async fn test_empty_scenario_passes_without_network_calls() {
    let (transport, bot) = InMemoryTransport::new();
    let bot = spawn_replier(bot, &[]);
    let mut session = open(&transport).await;

    let result = ScenarioRunner::new(&mut session)
        .run(&Scenario::new("empty"))
        .await;

    assert!(result.is_empty());
    assert!(result.passed());
    assert_eq!(transport.calls(), 0);

    drop(session);
    drop(transport);
    assert!(bot.await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_skips_after_timeout() {
    let (transport, bot) = InMemoryTransport::new();
    let bot = spawn_replier(bot, ABC_BOT);
    let mut session = open(&transport).await;

    let result = ScenarioRunner::new(&mut session).run(&abc_scenario()).await;

    assert_eq!(
        kinds(result.steps.iter().map(|r| r.outcome.clone())),
        ["matched", "timed-out", "skipped"]
    );
    assert!(!result.passed());
    assert_eq!(result.failures().count(), 1);
    assert_eq!(result.steps[2].elapsed, Duration::ZERO);

    drop(session);
    drop(transport);
    assert_eq!(bot.await.unwrap(), ["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn test_continue_on_failure_runs_every_step() {
    let (transport, bot) = InMemoryTransport::new();
    let _bot = spawn_replier(bot, ABC_BOT);
    let mut session = open(&transport).await;

    let scenario = abc_scenario().continue_on_failure();
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert_eq!(
        kinds(result.steps.iter().map(|r| r.outcome.clone())),
        ["matched", "timed-out", "matched"]
    );
    assert_eq!(transport.calls(), 3);
    assert_eq!(result.steps[2].outcome.event().unwrap().text(), "C!");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_unmatched_events() {
    let (transport, bot) = InMemoryTransport::new();
    let _bot = spawn_replier(bot, &[("order", "Loading...")]);
    let mut session = open(&transport).await;

    let scenario = Scenario::new("slow").step(
        Step::send_text("order")
            .expect_text("Done")
            .timeout(Duration::from_secs(1)),
    );
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    match &result.steps[0].outcome {
        StepOutcome::TimedOut(report) => {
            assert_eq!(report.waited, Duration::from_secs(1));
            assert_eq!(report.noise.len(), 1);
            assert_eq!(report.noise[0].text(), "Loading...");
        }
        other => panic!("expected a timeout, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_text_match_skips_earlier_replies() {
    let (transport, mut bot) = InMemoryTransport::new();
    tokio::spawn(async move {
        while bot.next_action().await.is_some() {
            bot.reply("Thinking").await;
            sleep(Duration::from_millis(500)).await;
            bot.reply("Here is your order").await;
        }
    });
    let mut session = open(&transport).await;

    let scenario = Scenario::new("order").step(Step::send_text("order").expect_text("your order"));
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert!(result.passed());
    assert_eq!(
        result.steps[0].outcome.event().unwrap().text(),
        "Here is your order"
    );
}

#[tokio::test(start_paused = true)]
async fn test_button_flow() {
    let (transport, mut bot) = InMemoryTransport::new();
    tokio::spawn(async move {
        while let Some(action) = bot.next_action().await {
            match action {
                UserAction::Text { text, .. } if text == "/start" => {
                    bot.reply_with_buttons("Continue?", &[&["Yes", "No"]]).await;
                }
                UserAction::Callback {
                    message_id, data, ..
                } if data == b"Yes" => {
                    bot.answer_callback(message_id, Some("ok")).await;
                    bot.edit(message_id, "Continue? Yes", &[]).await;
                    bot.reply("Confirmed").await;
                }
                _ => {}
            }
        }
    });
    let mut session = open(&transport)
        .await
        .with_label_match(LabelMatch::Normalized);

    let scenario = Scenario::new("confirm")
        .step(Step::command("start").expect_buttons(["No", "Yes"]))
        .step(Step::tap("yes").expect_text("Confirmed"));
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert!(result.passed(), "{:?}", result.steps);
    assert_eq!(transport.calls(), 2);
    assert_eq!(
        result.steps[1].outcome.event().unwrap().kind,
        EventKind::TextMessage
    );
    // The edit stripped the keyboard.
    assert!(session.last_layout().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_any_resolves_on_callback_answer() {
    let (transport, mut bot) = InMemoryTransport::new();
    tokio::spawn(async move {
        while let Some(action) = bot.next_action().await {
            match action {
                UserAction::Text { .. } => {
                    bot.reply_with_buttons("Menu", &[&["Go"]]).await;
                }
                UserAction::Callback { message_id, .. } => {
                    bot.answer_callback(message_id, None).await;
                    bot.reply("Gone").await;
                }
            }
        }
    });
    let mut session = open(&transport).await;

    let scenario = Scenario::new("menu")
        .step(Step::command("menu"))
        .step(Step::tap("Go").expect_any());
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert!(result.passed());
    assert_eq!(
        result.steps[1].outcome.event().unwrap().kind,
        EventKind::CallbackAck
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_button_makes_no_network_call() {
    let (transport, mut bot) = InMemoryTransport::new();
    tokio::spawn(async move {
        while bot.next_action().await.is_some() {
            bot.reply_with_buttons("Pick one", &[&["Yes", "No"]]).await;
        }
    });
    let mut session = open(&transport).await;

    let scenario = Scenario::new("pick")
        .step(Step::command("start").expect_buttons(["Yes", "No"]))
        .step(Step::tap("Maybe"))
        .step(Step::send_text("unreachable"));
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    match &result.steps[1].outcome {
        StepOutcome::Errored(StepError::ButtonNotFound { label, available }) => {
            assert_eq!(label, "Maybe");
            assert_eq!(available, &["Yes", "No"]);
        }
        other => panic!("expected ButtonNotFound, got {other}"),
    }
    assert!(matches!(result.steps[2].outcome, StepOutcome::Skipped));
    assert!(result.transport_error().is_none());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_next_step_waits_for_resolution() {
    let (transport, mut bot) = InMemoryTransport::new();
    let replied_at = Arc::new(Mutex::new(None));
    let second_at = Arc::new(Mutex::new(None));
    {
        let replied_at = replied_at.clone();
        let second_at = second_at.clone();
        tokio::spawn(async move {
            while let Some(action) = bot.next_action().await {
                match action.text().as_str() {
                    "first" => {
                        sleep(Duration::from_secs(1)).await;
                        *replied_at.lock().unwrap() = Some(Instant::now());
                        bot.reply("one").await;
                    }
                    "second" => {
                        *second_at.lock().unwrap() = Some(action.at());
                        bot.reply("two").await;
                    }
                    _ => {}
                }
            }
        });
    }
    let mut session = open(&transport).await;

    let scenario = Scenario::new("sequence")
        .step(Step::send_text("first").expect_text("one"))
        .step(Step::send_text("second").expect_text("two"));
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert!(result.passed());
    let replied_at = replied_at.lock().unwrap().unwrap();
    let second_at = second_at.lock().unwrap().unwrap();
    assert!(second_at >= replied_at);
}

#[tokio::test(start_paused = true)]
async fn test_send_latency_does_not_count_against_timeout() {
    let (transport, mut bot) = InMemoryTransport::with_send_delay(Duration::from_secs(3));
    tokio::spawn(async move {
        while bot.next_action().await.is_some() {
            sleep(Duration::from_millis(1500)).await;
            bot.reply("pong").await;
        }
    });
    let mut session = open(&transport).await;

    let scenario = Scenario::new("latency").step(
        Step::send_text("ping")
            .expect_text("pong")
            .timeout(Duration::from_secs(2)),
    );
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert!(result.passed(), "{:?}", result.steps);
    assert!(result.steps[0].elapsed >= Duration::from_millis(4500));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_in_flight_wins_over_buffered_match() {
    let (transport, mut bot) = InMemoryTransport::new();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while bot.next_action().await.is_some() {
                cancel.cancel();
                bot.reply("hello").await;
            }
        });
    }
    let mut session = open(&transport).await;

    let scenario = Scenario::new("cancel")
        .step(Step::send_text("hi").expect_text("hello"))
        .step(Step::send_text("bye"));
    let result = ScenarioRunner::new(&mut session)
        .with_cancellation(cancel)
        .run(&scenario)
        .await;

    assert_eq!(
        kinds(result.steps.iter().map(|r| r.outcome.clone())),
        ["cancelled", "skipped"]
    );
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_run_skips_everything() {
    let (transport, bot) = InMemoryTransport::new();
    let _bot = spawn_replier(bot, ABC_BOT);
    let mut session = open(&transport).await;

    let mut runner = ScenarioRunner::new(&mut session);
    runner.cancellation_token().cancel();
    let result = runner.run(&abc_scenario()).await;

    assert_eq!(
        kinds(result.steps.iter().map(|r| r.outcome.clone())),
        ["skipped", "skipped", "skipped"]
    );
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_errors_remaining_steps() {
    let (transport, mut bot) = InMemoryTransport::new();
    tokio::spawn(async move {
        while let Some(action) = bot.next_action().await {
            match action.text().as_str() {
                "a" => {
                    bot.reply("A!").await;
                }
                _ => bot.disconnect("connection reset").await,
            }
        }
    });
    let mut session = open(&transport).await;

    let scenario = abc_scenario().continue_on_failure();
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert_eq!(
        kinds(result.steps.iter().map(|r| r.outcome.clone())),
        ["matched", "errored", "errored"]
    );
    assert!(matches!(
        result.transport_error(),
        Some(TransportError::Disconnected(_))
    ));
    assert_eq!(transport.calls(), 2);
    assert!(!session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_no_reply_step_resolves_immediately() {
    let (transport, bot) = InMemoryTransport::new();
    let _bot = spawn_replier(bot, &[("bye", "See you"), ("ping", "pong")]);
    let mut session = open(&transport).await;

    let scenario = Scenario::new("quiet")
        .step(Step::send_text("bye").expect_no_reply())
        .step(Step::send_text("ping").expect_text("pong"));
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert!(result.passed());
    assert!(result.steps[0].outcome.event().is_none());
    assert_eq!(result.steps[1].outcome.event().unwrap().text(), "pong");
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_delays_sends_not_deadlines() {
    let (transport, bot) = InMemoryTransport::new();
    let _bot = spawn_replier(bot, &[("one", "1"), ("two", "2")]);
    let pacer = Pacer::new(&PacingConfig {
        send_delay_min: Duration::ZERO,
        send_delay_max: Duration::ZERO,
        rate_max_actions: 1,
        rate_window: Duration::from_secs(10),
        ..PacingConfig::default()
    });
    let mut session = open(&transport).await.with_pacer(pacer);

    let scenario = Scenario::new("paced")
        .step(Step::send_text("one").expect_text("1"))
        .step(
            Step::send_text("two")
                .expect_text("2")
                .timeout(Duration::from_secs(1)),
        );
    let start = Instant::now();
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert!(result.passed(), "{:?}", result.steps);
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_independent_sessions_run_concurrently() {
    let (first, first_bot) = InMemoryTransport::new();
    let (second, second_bot) = InMemoryTransport::new();
    let _first_bot = spawn_replier(first_bot, ABC_BOT);
    let _second_bot = spawn_replier(second_bot, &[("x", "X!")]);
    let mut first_session = open(&first).await;
    let mut second_session = open(&second).await;

    let abc = abc_scenario().continue_on_failure();
    let x = Scenario::new("x").step(Step::send_text("x").expect_text("X!"));
    let mut first_runner = ScenarioRunner::new(&mut first_session);
    let mut second_runner = ScenarioRunner::new(&mut second_session);
    let (first_result, second_result) =
        tokio::join!(first_runner.run(&abc), second_runner.run(&x),);

    assert_eq!(first_result.len(), 3);
    assert!(!first_result.passed());
    assert!(second_result.passed());
}

#[tokio::test(start_paused = true)]
async fn test_parsed_script_runs() {
    let (transport, mut bot) = InMemoryTransport::new();
    tokio::spawn(async move {
        while let Some(action) = bot.next_action().await {
            match action.text().as_str() {
                "/start" => {
                    bot.reply_with_buttons("Welcome", &[&["Sign up", "Help"]])
                        .await;
                }
                "Sign up" => {
                    bot.reply("Your name?").await;
                }
                name => {
                    bot.reply(&format!("Welcome, {name}")).await;
                }
            }
        }
    });
    let mut session = open(&transport).await;

    let script = r#"
scenario "signup"
command start
expect buttons "Sign up" "Help"
tap "Sign up"
expect text "name?" 5s
send "Ada"    # answer the prompt
expect text "Welcome, Ada"
"#;
    let scenario = parse_str(script).unwrap();
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert_eq!(result.scenario, "signup");
    assert_eq!(result.len(), 3);
    assert!(result.passed(), "{:?}", result.steps);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_timeout_from_script() {
    let (transport, bot) = InMemoryTransport::new();
    let _bot = spawn_replier(bot, &[("hi", "hello")]);
    let mut session = open(&transport).await;

    let scenario = parse_str("send \"hi\"\ntimeout 10000000000000000000s\n").unwrap();
    let unbounded = Scenario::new("forever").step(Step::send_text("hi").timeout(Duration::MAX));

    for scenario in [scenario, unbounded] {
        let result = ScenarioRunner::new(&mut session).run(&scenario).await;
        assert!(result.passed(), "{:?}", result.steps);
    }
}

#[tokio::test(start_paused = true)]
async fn test_flood_wait_holds_later_sends() {
    let (transport, bot) = InMemoryTransport::new();
    bot.fail_next(TransportError::FloodWait { seconds: 5 });
    let _bot = spawn_replier(bot, &[("again", "ok")]);
    let pacer = Pacer::new(&PacingConfig {
        send_delay_min: Duration::ZERO,
        send_delay_max: Duration::ZERO,
        floodwait_buffer: Duration::from_secs(2),
        ..PacingConfig::default()
    });
    let mut session = open(&transport).await.with_pacer(pacer);

    let flooded = Scenario::new("flooded").step(Step::send_text("hi").expect_text("never"));
    let result = ScenarioRunner::new(&mut session).run(&flooded).await;
    assert!(matches!(
        result.steps[0].outcome,
        StepOutcome::Errored(StepError::Transport(TransportError::FloodWait { seconds: 5 }))
    ));
    assert!(session.pacer().is_cooling_down().await);
    assert!(session.is_connected());

    let start = Instant::now();
    let retry = Scenario::new("retry").step(Step::send_text("again").expect_text("ok"));
    let result = ScenarioRunner::new(&mut session).run(&retry).await;

    assert!(result.passed(), "{:?}", result.steps);
    assert!(start.elapsed() >= Duration::from_secs(7));
    assert!(!session.pacer().is_cooling_down().await);
}

#[tokio::test(start_paused = true)]
async fn test_peer_flood_on_tap_opens_breaker() {
    let (transport, mut bot) = InMemoryTransport::new();
    tokio::spawn(async move {
        while bot.next_action().await.is_some() {
            bot.fail_next(TransportError::PeerFlood);
            bot.reply_with_buttons("Menu", &[&["Go"]]).await;
        }
    });
    let pacer = Pacer::new(&PacingConfig {
        send_delay_min: Duration::ZERO,
        send_delay_max: Duration::ZERO,
        ..PacingConfig::default()
    });
    let mut session = open(&transport).await.with_pacer(pacer);

    let scenario = Scenario::new("menu")
        .step(Step::command("menu").expect_buttons(["Go"]))
        .step(Step::tap("Go"))
        .step(Step::send_text("unreachable"));
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert_eq!(
        kinds(result.steps.iter().map(|r| r.outcome.clone())),
        ["matched", "errored", "errored"]
    );
    assert_eq!(result.transport_error(), Some(&TransportError::PeerFlood));
    assert_eq!(transport.calls(), 2);
    assert!(session.pacer().is_cooling_down().await);
}

#[tokio::test(start_paused = true)]
async fn test_tap_label_must_match_exactly_by_default() {
    let (transport, mut bot) = InMemoryTransport::new();
    tokio::spawn(async move {
        while bot.next_action().await.is_some() {
            bot.reply_with_buttons("Continue?", &[&["Yes", "No"]]).await;
        }
    });
    let mut session = open(&transport).await;

    let scenario = Scenario::new("case")
        .step(Step::command("start").expect_buttons(["Yes", "No"]))
        .step(Step::tap("yes"));
    let result = ScenarioRunner::new(&mut session).run(&scenario).await;

    assert!(matches!(
        &result.steps[1].outcome,
        StepOutcome::Errored(StepError::ButtonNotFound { label, .. }) if label == "yes"
    ));
    assert_eq!(transport.calls(), 1);
}
