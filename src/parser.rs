//! Script parser for botdialog scenario files.
//!
//! The top-level entry points are [`parse_str`] and [`parse_file`]; use
//! [`ScriptParser`] to change the default step timeout.

use crate::matcher::{Expect, Matcher};
use crate::scenario::{DEFAULT_STEP_TIMEOUT, FailurePolicy, Scenario, Step};
use anyhow::{Context as _, Result, anyhow, bail};
use std::path::Path;
use std::time::Duration;

/// Parse a scenario script from a string slice with the default step timeout.
///
/// Lines that are empty or start with `#` are ignored. Inline comments (` # …`)
/// are stripped while preserving `#` characters inside quoted strings.
///
/// # Errors
///
/// Returns an error if any line contains an unknown directive, a malformed
/// argument, an unclosed quoted string, or an `expect`/`timeout` with no step
/// before it.
///
/// # Example
///
/// ```
/// use botdialog::parse_str;
///
/// let scenario = parse_str("command start\nexpect text \"Welcome\" 5s\ntap \"Help\"\n").unwrap();
/// assert_eq!(scenario.steps.len(), 2);
/// ```
pub fn parse_str(content: &str) -> Result<Scenario> {
    ScriptParser::default().parse_str(content)
}

/// Parse a scenario script from a file with the default step timeout.
///
/// The scenario is named after the file stem unless the script names it.
///
/// # Example
///
/// ```no_run
/// use botdialog::parse_file;
///
/// let scenario = parse_file("signup.dialog").unwrap();
/// ```
pub fn parse_file(path: impl AsRef<Path>) -> Result<Scenario> {
    ScriptParser::default().parse_file(path)
}

/// Script parser with a configurable default step timeout.
#[derive(Debug, Clone)]
pub struct ScriptParser {
    default_timeout: Duration,
}

impl Default for ScriptParser {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_TIMEOUT)
    }
}

impl ScriptParser {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn parse_str(&self, content: &str) -> Result<Scenario> {
        self.parse_named(content, "scenario")
    }

    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<Scenario> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script file: {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scenario".to_string());
        self.parse_named(&content, &name)
    }

    fn parse_named(&self, content: &str, name: &str) -> Result<Scenario> {
        let mut builder = Builder {
            scenario: Scenario::new(name),
            default_timeout: self.default_timeout,
            expect_set: false,
        };
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = strip_inline_comment(line);
            parse_line(line, &mut builder)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
        }
        Ok(builder.scenario)
    }
}

struct Builder {
    scenario: Scenario,
    default_timeout: Duration,
    /// Whether the last step already has an explicit `expect`.
    expect_set: bool,
}

impl Builder {
    fn push(&mut self, step: Step) {
        self.scenario.steps.push(step.timeout(self.default_timeout));
        self.expect_set = false;
    }

    fn last_step(&mut self, directive: &str) -> Result<&mut Step> {
        self.scenario
            .steps
            .last_mut()
            .ok_or_else(|| anyhow!("'{directive}' must follow a send, command or tap line"))
    }
}

type DirectiveFn = fn(&str, &mut Builder) -> Result<()>;

static REGISTRY: &[(&str, DirectiveFn)] = &[
    ("scenario", parse_scenario),
    ("policy", parse_policy),
    ("send", parse_send),
    ("command", parse_command),
    ("tap", parse_tap),
    ("expect", parse_expect),
    ("timeout", parse_timeout),
];

/// Dispatch a single non-empty, non-comment line to the matching directive.
fn parse_line(line: &str, builder: &mut Builder) -> Result<()> {
    let (name, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    REGISTRY
        .iter()
        .find(|(directive, _)| *directive == name)
        .map(|(_, parse)| parse(args, builder))
        .unwrap_or_else(|| Err(anyhow!("Unknown directive: {}", line)))
}

fn parse_scenario(args: &str, builder: &mut Builder) -> Result<()> {
    builder.scenario.name = parse_quoted_string(args)?;
    Ok(())
}

fn parse_policy(args: &str, builder: &mut Builder) -> Result<()> {
    builder.scenario.policy = match args.trim() {
        "fail-fast" => FailurePolicy::FailFast,
        "continue" => FailurePolicy::ContinueOnFailure,
        other => bail!("Unknown policy '{other}', expected 'fail-fast' or 'continue'"),
    };
    Ok(())
}

fn parse_send(args: &str, builder: &mut Builder) -> Result<()> {
    builder.push(Step::send_text(parse_quoted_string(args)?));
    Ok(())
}

fn parse_command(args: &str, builder: &mut Builder) -> Result<()> {
    let args = args.trim();
    let name = if args.starts_with('"') {
        parse_quoted_string(args)?
    } else {
        args.to_string()
    };
    if name.trim_start_matches('/').trim().is_empty() {
        bail!("Expected a command name after 'command'");
    }
    builder.push(Step::command(name));
    Ok(())
}

fn parse_tap(args: &str, builder: &mut Builder) -> Result<()> {
    builder.push(Step::tap(parse_quoted_string(args)?));
    Ok(())
}

/// `expect text "needle" [timeout]`, `expect buttons "A" "B" [timeout]`,
/// `expect any [timeout]`, `expect nothing`.
fn parse_expect(args: &str, builder: &mut Builder) -> Result<()> {
    if builder.expect_set {
        bail!("Step already has an expectation");
    }
    let args = args.trim();
    let (kind, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let (expect, timeout) = match kind {
        "text" => {
            let (strings, remainder) = split_quoted_strings(rest)?;
            let [needle] = <[String; 1]>::try_from(strings)
                .map_err(|_| anyhow!("'expect text' takes exactly one quoted string"))?;
            (Expect::Reply(Matcher::TextContains(needle)), remainder)
        }
        "buttons" => {
            let (labels, remainder) = split_quoted_strings(rest)?;
            if labels.is_empty() {
                bail!("'expect buttons' needs at least one quoted label");
            }
            (Expect::Reply(Matcher::buttons(labels)), remainder)
        }
        "any" => (Expect::Reply(Matcher::Any), rest),
        "nothing" => {
            if !rest.trim().is_empty() {
                bail!("'expect nothing' takes no timeout");
            }
            (Expect::NoReply, "")
        }
        other => bail!("Unknown expectation '{other}', expected text, buttons, any or nothing"),
    };

    let step = builder.last_step("expect")?;
    step.expect = expect;
    if !timeout.trim().is_empty() {
        step.timeout = parse_duration(timeout)?;
    }
    builder.expect_set = true;
    Ok(())
}

fn parse_timeout(args: &str, builder: &mut Builder) -> Result<()> {
    let timeout = parse_duration(args)?;
    builder.last_step("timeout")?.timeout = timeout;
    Ok(())
}

/// Strip inline comments from a line, preserving `#` inside quoted strings.
fn strip_inline_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if ch == '#' && !in_quotes {
            return line[..i].trim();
        }
    }
    line
}

/// Read consecutive quoted strings from the start of `s` and return them with
/// the unquoted remainder.
fn split_quoted_strings(s: &str) -> Result<(Vec<String>, &str)> {
    let mut strings = Vec::new();
    let mut rest = s.trim_start();
    while rest.starts_with('"') {
        // Locate the closing quote, respecting backslash escapes.
        let mut escaped = false;
        let mut end_idx = None;
        for (i, ch) in rest.char_indices().skip(1) {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
                continue;
            }
            if ch == '"' {
                end_idx = Some(i);
                break;
            }
        }
        let end_idx = end_idx.ok_or_else(|| anyhow!("Unclosed quote"))?;
        strings.push(parse_quoted_string(&rest[..=end_idx])?);
        rest = rest[end_idx + 1..].trim_start();
    }
    Ok((strings, rest))
}

/// Parse a duration string: `1s`, `500ms`, `1.5s`.
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(ms_str) = s.strip_suffix("ms") {
        let ms: u64 = ms_str
            .trim()
            .parse()
            .context("Invalid milliseconds value")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(s_str) = s.strip_suffix('s') {
        let secs: f64 = s_str.trim().parse().context("Invalid seconds value")?;
        Duration::try_from_secs_f64(secs).context("Invalid seconds value")
    } else {
        Err(anyhow!("Duration must end with 's' or 'ms', got: {}", s))
    }
}

/// Parse a double-quoted string, processing `\n`, `\t`, `\"`, and `\\`.
///
/// Unknown escapes and unescaped quotes inside the string are errors.
pub(crate) fn parse_quoted_string(s: &str) -> Result<String> {
    let s = s.trim();
    if !s.starts_with('"') {
        return Err(anyhow!("Expected string to start with '\"'"));
    }
    if s.len() < 2 || !s.ends_with('"') {
        return Err(anyhow!("Expected string to end with '\"'"));
    }

    let mut out = String::with_capacity(s.len() - 2);
    let mut chars = s[1..s.len() - 1].chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => bail!("Unknown escape sequence '\\{other}'"),
                None => bail!("Expected string to end with '\"'"),
            },
            '"' => bail!("Unescaped '\"' inside quoted string"),
            other => out.push(other),
        }
    }
    Ok(out)
}
