//! External process invocation.
//!
//! The mesher and the solver are plain executables driven through their
//! command line. Parameters are injected as `-setnumber <name> <value>`
//! triples ahead of the positional arguments.

use std::process::Command;

use tracing::debug;

use crate::error::{ProblemError, ProblemResult};

/// Flag both tools accept for overriding a numeric constant.
pub const SETNUMBER_FLAG: &str = "-setnumber";

/// Runs an executable and hands back what it printed.
///
/// Implementations must fail with [`ProblemError::ExternalTool`] on a
/// non-zero exit status.
pub trait ToolRunner {
    fn run(&self, program: &str, args: &[String]) -> ProblemResult<String>;
}

impl<T: ToolRunner + ?Sized> ToolRunner for &T {
    fn run(&self, program: &str, args: &[String]) -> ProblemResult<String> {
        (**self).run(program, args)
    }
}

/// Runs tools as child processes, blocking until they exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> ProblemResult<String> {
        debug!(program, ?args, "spawning");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ProblemError::Launch {
                tool: program.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let status = output.status.code().unwrap_or(-1);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(ProblemError::ExternalTool {
                tool: program.to_string(),
                status,
                output: detail,
            });
        }

        let mut text = stdout.into_owned();
        text.push_str(&stderr);
        Ok(text)
    }
}

/// Tokens injecting each `(name, value)` pair, in iteration order.
pub fn setnumber_args<'a>(values: impl IntoIterator<Item = (&'a str, f64)>) -> Vec<String> {
    values
        .into_iter()
        .flat_map(|(name, value)| [SETNUMBER_FLAG.to_string(), name.to_string(), value.to_string()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setnumber_triples_keep_order() {
        let args = setnumber_args([("DO_y", 0.035), ("DO_a", 0.0075)]);
        assert_eq!(
            args,
            vec!["-setnumber", "DO_y", "0.035", "-setnumber", "DO_a", "0.0075"]
        );
    }

    #[test]
    fn setnumber_empty() {
        assert!(setnumber_args(std::iter::empty()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout() {
        let out = ProcessRunner
            .run("echo", &["1234".to_string(), "nodes".to_string()])
            .unwrap();
        assert_eq!(out.trim(), "1234 nodes");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_external_tool_error() {
        let err = ProcessRunner
            .run("sh", &["-c".to_string(), "echo boom >&2; exit 3".to_string()])
            .unwrap_err();
        match err {
            ProblemError::ExternalTool { status, output, .. } => {
                assert_eq!(status, 3);
                assert_eq!(output, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_executable_is_launch_error() {
        let err = ProcessRunner
            .run("busbar-opt-no-such-tool", &[])
            .unwrap_err();
        assert!(matches!(err, ProblemError::Launch { .. }));
    }
}
