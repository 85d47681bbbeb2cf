use anyhow::Result;
use crank_lib::build::{BuildError, BuildOutput, Orchestrator, cancel_pair};
use tracing::{error, info};

use crate::TargetArgs;

use super::{build_options, open_session};

/// Install dependencies and run the package's build command sequence.
pub async fn build(args: TargetArgs, build_id: Option<String>) -> Result<BuildOutput> {
  let session = open_session(&args)?;
  let orchestrator = Orchestrator::new(session.cache.clone(), build_options(&session, build_id));

  // Ctrl-C terminates the in-flight build step rather than orphaning it.
  let (handle, mut token) = cancel_pair();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      handle.cancel();
    }
  });

  let result = orchestrator
    .build(&session.manifest, &session.plan, session.auth_token.as_deref(), &mut token)
    .await;

  match result {
    Ok(output) => {
      info!(
        package = %output.package.name,
        build_id = %output.build_id,
        steps = output.steps.len(),
        "build succeeded"
      );
      Ok(output)
    }
    Err(BuildError::StepFailed {
      index,
      kind,
      command,
      code,
      stdout,
      stderr,
    }) => {
      error!(step = index, kind = %kind, code = ?code, "build step failed: {command}");
      if !stdout.is_empty() {
        eprintln!("--- stdout ---\n{stdout}");
      }
      if !stderr.is_empty() {
        eprintln!("--- stderr ---\n{stderr}");
      }
      anyhow::bail!("{kind} step failed with exit code {code:?}")
    }
    Err(err) => Err(err.into()),
  }
}
