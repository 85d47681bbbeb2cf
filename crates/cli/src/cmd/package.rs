use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::TargetArgs;

use super::open_session;

/// Build the package, then pack its outputs and dependency provenance into a
/// distributable archive.
pub async fn package(
  args: TargetArgs,
  build_id: Option<String>,
  dest: PathBuf,
  provenance: Vec<(String, String)>,
) -> Result<()> {
  // Re-resolve once here so the plan used for packing is the one the build
  // ran against.
  let session = open_session(&args)?;
  let plan = session.plan.clone();
  drop(session);

  let output = super::build(args, build_id).await?;

  let provenance: BTreeMap<String, String> = provenance.into_iter().collect();
  let packed = crank_lib::archive::pack(&output, &plan, provenance, &dest).context("packing build outputs")?;

  info!(
    archive = %packed.path.display(),
    hash = %packed.hash,
    size = packed.size,
    "package ready"
  );
  println!("{}", packed.path.display());
  println!("sha256 {}", packed.hash);
  Ok(())
}
