//! Mapping a run request to the command line that executes it.

use crate::run::RunRequest;

/// Default test runner program.
pub const DEFAULT_PROGRAM: &str = "pytest";

/// Pure, deterministic mapping from a run request to a command line.
///
/// The first element is the program; the dispatcher treats the rest as
/// opaque arguments.
pub trait CommandComposer: Send + Sync {
    fn compose(&self, request: &RunRequest) -> Vec<String>;
}

/// Composes `<program> <base_args...> --env <environment> <paths...>`.
#[derive(Debug, Clone)]
pub struct TestCommandComposer {
    program: String,
    base_args: Vec<String>,
}

impl TestCommandComposer {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }
}

impl Default for TestCommandComposer {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, vec!["-v".to_string()])
    }
}

impl CommandComposer for TestCommandComposer {
    fn compose(&self, request: &RunRequest) -> Vec<String> {
        let mut cmd = Vec::with_capacity(3 + self.base_args.len() + request.paths.len());
        cmd.push(self.program.clone());
        cmd.extend(self.base_args.iter().cloned());
        cmd.push("--env".to_string());
        cmd.push(request.environment_name.clone());
        cmd.extend(request.paths.iter().cloned());
        cmd
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
