//! Terminal rendering for the jitlog commands.
//!
//! Colors follow what a value says about the compilation: green for code
//! that is live, red for failures and rejected inlines, yellow for anything
//! invalidated or anomalous, cyan for bytecode positions and intrinsics.
//! `NO_COLOR` always wins over `--color`.

use std::fmt::Display;
use std::io::Write;

use jitlog_engine::{BciMapping, CompileTask, DeoptEvent, InlineDecision, Outcome, TaskState};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

pub fn color_choice(flag: &str) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        "always" => ColorChoice::Always,
        "never" => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

#[derive(Debug, Clone, Copy)]
enum Tone {
    Plain,
    Quiet,
    Strong,
    Live,
    Broken,
    Suspect,
    Position,
}

impl Tone {
    fn spec(self) -> ColorSpec {
        let mut spec = ColorSpec::new();
        match self {
            Tone::Plain => {}
            Tone::Quiet => {
                spec.set_dimmed(true);
            }
            Tone::Strong => {
                spec.set_bold(true);
            }
            Tone::Live => {
                spec.set_fg(Some(Color::Green)).set_bold(true);
            }
            Tone::Broken => {
                spec.set_fg(Some(Color::Red)).set_bold(true);
            }
            Tone::Suspect => {
                spec.set_fg(Some(Color::Yellow)).set_bold(true);
            }
            Tone::Position => {
                spec.set_fg(Some(Color::Cyan));
            }
        }
        spec
    }
}

pub struct Terminal {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl Terminal {
    pub fn new(choice: ColorChoice) -> Self {
        Terminal {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    fn paint(&mut self, tone: Tone, text: &str) {
        let _ = self.stdout.set_color(&tone.spec());
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    pub fn text(&mut self, text: &str) {
        self.paint(Tone::Plain, text);
    }

    /// Secondary detail: stamps, sizes, call-site positions.
    pub fn detail(&mut self, text: &str) {
        self.paint(Tone::Quiet, text);
    }

    pub fn strong(&mut self, text: &str) {
        self.paint(Tone::Strong, text);
    }

    pub fn good(&mut self, text: &str) {
        self.paint(Tone::Live, text);
    }

    pub fn suspect(&mut self, text: &str) {
        self.paint(Tone::Suspect, text);
    }

    pub fn position(&mut self, text: &str) {
        self.paint(Tone::Position, text);
    }

    pub fn end_line(&mut self) {
        let _ = writeln!(self.stdout);
    }

    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    pub fn heading(&mut self, text: &str) {
        self.strong(text);
        self.end_line();
    }

    /// `  label:  value` with the label column aligned.
    pub fn field(&mut self, label: &str, value: impl Display) {
        self.detail(&format!("  {:<22}", format!("{}:", label)));
        self.text(&value.to_string());
        self.end_line();
    }

    /// Like [`Terminal::field`], highlighting counts of things that should not happen.
    pub fn anomaly(&mut self, label: &str, count: u64) {
        self.detail(&format!("  {:<22}", format!("{}:", label)));
        if count == 0 {
            self.text("0");
        } else {
            self.suspect(&count.to_string());
        }
        self.end_line();
    }

    /// Lifecycle of a task as one word, failures with their reason.
    pub fn task_state(&mut self, task: &CompileTask) {
        match (&task.state, &task.outcome) {
            (TaskState::Abandoned, _) => self.suspect("abandoned"),
            (_, Outcome::Succeeded) if task.is_invalidated() => self.suspect("invalidated"),
            (_, Outcome::Succeeded) => self.good("ok"),
            (_, Outcome::Failed { reason }) => {
                let reason = reason.as_deref().unwrap_or("unknown");
                self.paint(Tone::Broken, &format!("failed: {}", reason))
            }
            (_, Outcome::Pending) => self.detail("pending"),
        }
    }

    /// A runtime event attached to a task; invalidating ones stand out.
    pub fn deopt(&mut self, deopt: &DeoptEvent) {
        let kind = format!("{:?}", deopt.kind);
        if deopt.invalidates() {
            self.suspect(&kind);
        } else {
            self.detail(&kind);
        }
        if let Some(bci) = deopt.bci {
            self.position(&format!(" @{}", bci));
        }
        self.detail(&format!(
            " reason={} action={}",
            deopt.reason.as_deref().unwrap_or("-"),
            deopt.action.as_deref().unwrap_or("-"),
        ));
    }

    pub fn decision(&mut self, decision: InlineDecision) {
        match decision {
            InlineDecision::Inlined => self.good("inlined"),
            InlineDecision::NotInlined => self.paint(Tone::Broken, "not inlined"),
            InlineDecision::Intrinsic => self.position("intrinsic"),
        }
    }

    /// Bytecode origin of a correlation entry.
    pub fn mapping(&mut self, mapping: BciMapping) {
        match mapping {
            BciMapping::Prologue => self.detail("prologue"),
            BciMapping::NoMapping => self.detail("no mapping"),
            BciMapping::Bytecode { first, last } if first == last => {
                self.position(&format!("bci {}", first))
            }
            BciMapping::Bytecode { first, last } => {
                self.position(&format!("bci {}..{}", first, last))
            }
        }
    }

    /// `warning: ...` on stderr.
    pub fn warn(&mut self, text: &str) {
        let _ = self.stderr.set_color(&Tone::Suspect.spec());
        let _ = write!(self.stderr, "warning");
        let _ = self.stderr.reset();
        let _ = writeln!(self.stderr, ": {}", text);
    }
}
