// src/exec/recording.rs

//! Executor double that records invocations instead of running them

use super::{CommandOutput, CommandSpec, PrivilegedExecutor};
use crate::error::Result;
use std::sync::Mutex;

struct FailureRule {
    needle: String,
    output: CommandOutput,
}

/// Records every command; succeeds unless a failure rule matches
///
/// A rule matches when any argv element contains its needle. The first
/// matching rule wins.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<CommandSpec>>,
    failures: Mutex<Vec<FailureRule>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make commands containing `needle` exit with `exit_code`
    pub fn fail_when(&self, needle: impl Into<String>, exit_code: i32, stderr: impl Into<String>) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FailureRule {
                needle: needle.into(),
                output: CommandOutput::failure(exit_code, stderr),
            });
    }

    /// All recorded invocations, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded argv vectors, in order
    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls().into_iter().map(|c| c.argv).collect()
    }

    /// Recorded commands rendered as single strings
    pub fn rendered(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl PrivilegedExecutor for RecordingExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(spec.clone());

        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let output = failures
            .iter()
            .find(|rule| spec.argv.iter().any(|arg| arg.contains(&rule.needle)))
            .map(|rule| rule.output.clone())
            .unwrap_or_else(CommandOutput::success);
        Ok(output)
    }
}
