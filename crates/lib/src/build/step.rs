//! Execution of a single external build step.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::manifest::{Executable, StepKind};

use super::types::{BuildError, CancelToken, StepLog};

/// Run one build step to completion, capturing its output.
///
/// The command is executed directly (no shell) in `cwd` with exactly the
/// supplied environment. A non-zero exit aborts with
/// [`BuildError::StepFailed`]; a cancellation request kills the child and
/// surfaces [`BuildError::Cancelled`] instead.
pub(crate) async fn run_step(
  index: usize,
  kind: StepKind,
  executable: &Executable,
  env: &BTreeMap<String, String>,
  cwd: &Path,
  cancel: &mut CancelToken,
) -> Result<StepLog, BuildError> {
  let command_line = executable.command_line();
  info!(step = index, kind = %kind, command = %command_line, "running build step");

  let mut command = Command::new(&executable.command);
  command
    .args(&executable.options)
    .args(&executable.arguments)
    .current_dir(cwd)
    .env_clear()
    .envs(env)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  debug!(cwd = %cwd.display(), "spawning build command");

  let output = tokio::select! {
    output = command.output() => match output {
      Ok(output) => output,
      // Spawn failures (missing tool, permission) are step failures too:
      // the command named by the manifest could not run.
      Err(err) => {
        return Err(BuildError::StepFailed {
          index,
          kind,
          command: command_line,
          code: None,
          stdout: String::new(),
          stderr: err.to_string(),
        });
      }
    },
    _ = cancel.cancelled() => {
      warn!(step = index, kind = %kind, "build step cancelled");
      return Err(BuildError::Cancelled {
        index,
        kind,
        command: command_line,
      });
    }
  };

  let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
  let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

  if !output.status.success() {
    return Err(BuildError::StepFailed {
      index,
      kind,
      command: command_line,
      code: output.status.code(),
      stdout,
      stderr,
    });
  }

  debug!(step = index, kind = %kind, "build step succeeded");
  Ok(StepLog {
    kind,
    command: command_line,
    stdout,
    stderr,
  })
}
