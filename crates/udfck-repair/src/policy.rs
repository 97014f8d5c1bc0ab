//! Fix gating.
//!
//! One gate for every mutation: check-only runs skip, autofix runs apply,
//! interactive runs consult a `Prompter`. Tests script the prompter; the CLI
//! installs a stdin-backed one.

use std::io::{BufRead, Write};
use tracing::debug;

/// How the run was asked to treat fixable findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairMode {
    /// Report everything, write nothing.
    #[default]
    CheckOnly,
    /// Ask per fix site.
    Interactive,
    /// Apply every fix without prompting.
    AutoFix,
}

/// Decision for one fix site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixDecision {
    Apply,
    Skip,
}

/// Answers interactive prompts.
pub trait Prompter {
    /// Whether the described fix should be applied.
    fn confirm(&mut self, site: &str) -> bool;
}

/// Prompter over stdin/stderr for interactive runs. Empty input and `y`
/// accept, anything else declines.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&mut self, site: &str) -> bool {
        let mut err = std::io::stderr();
        let _ = write!(err, "{site} is broken. Fix it? [Y/n] ");
        let _ = err.flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "" | "y" | "Y" | "yes")
    }
}

/// Scripted prompter for tests: pops answers front-to-back, declines once
/// exhausted.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Vec<bool>,
    pub asked: Vec<String>,
}

impl ScriptedPrompter {
    #[must_use]
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: answers.iter().rev().copied().collect(),
            asked: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, site: &str) -> bool {
        self.asked.push(site.to_owned());
        self.answers.pop().unwrap_or(false)
    }
}

/// The run-wide gate threaded through walker and repair driver.
pub struct RepairPolicy {
    mode: RepairMode,
    prompter: Box<dyn Prompter>,
}

impl std::fmt::Debug for RepairPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairPolicy")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl RepairPolicy {
    #[must_use]
    pub fn check_only() -> Self {
        Self {
            mode: RepairMode::CheckOnly,
            prompter: Box::new(ScriptedPrompter::default()),
        }
    }

    #[must_use]
    pub fn autofix() -> Self {
        Self {
            mode: RepairMode::AutoFix,
            prompter: Box::new(ScriptedPrompter::default()),
        }
    }

    #[must_use]
    pub fn interactive(prompter: Box<dyn Prompter>) -> Self {
        Self {
            mode: RepairMode::Interactive,
            prompter,
        }
    }

    #[must_use]
    pub fn mode(&self) -> RepairMode {
        self.mode
    }

    /// Whether this policy can ever write.
    #[must_use]
    pub fn may_write(&self) -> bool {
        !matches!(self.mode, RepairMode::CheckOnly)
    }

    /// Gate one fix site.
    pub fn decide(&mut self, site: &str) -> FixDecision {
        let decision = match self.mode {
            RepairMode::CheckOnly => FixDecision::Skip,
            RepairMode::AutoFix => FixDecision::Apply,
            RepairMode::Interactive => {
                if self.prompter.confirm(site) {
                    FixDecision::Apply
                } else {
                    FixDecision::Skip
                }
            }
        };
        debug!(site, ?decision, "fix gate");
        decision
    }
}
