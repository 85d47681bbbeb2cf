use anyhow::{Context, Result};
use crank_lib::build::Orchestrator;
use tracing::info;

use crate::TargetArgs;

use super::{build_options, open_session};

/// Resolve the manifest's dependencies and assemble the install tree.
pub async fn install(args: TargetArgs) -> Result<()> {
  let session = open_session(&args)?;

  session
    .cache
    .fetch_all(&session.plan, session.auth_token.as_deref())
    .await
    .context("fetching dependency archives")?;

  let orchestrator = Orchestrator::new(session.cache.clone(), build_options(&session, None));
  let tree = orchestrator
    .materialize(&session.plan, session.auth_token.as_deref())
    .await
    .context("materializing install tree")?;

  info!(
    prefix = %tree.prefix.display(),
    installed = tree.nodes.len(),
    extracted = tree.extracted_count(),
    "install tree ready"
  );
  for node in &tree.nodes {
    println!("{} {} ({})", node.name, node.version, node.hash.short());
  }
  Ok(())
}
