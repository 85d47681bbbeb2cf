//! Build environment construction.
//!
//! External build commands inherit the ambient process environment (build
//! tools need PATH, HOME and toolchain variables) overlaid with the crank
//! variables that let build scripts locate the install tree and their
//! dependencies without hardcoding paths.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::types::{BuildOptions, InstallTree};

pub const ENV_INSTALL_DIR: &str = "CRANK_INSTALL_DIR";
pub const ENV_PLATFORM: &str = "CRANK_PLATFORM";
pub const ENV_CONFIGURATION: &str = "CRANK_CONFIGURATION";
pub const ENV_BUILD_ID: &str = "CRANK_BUILD_ID";
pub const ENV_DEP_PREFIX: &str = "CRANK_DEP_";

/// The environment for one build run.
pub fn build_env(options: &BuildOptions, tree: &InstallTree, build_id: &str) -> BTreeMap<String, String> {
  let mut env: BTreeMap<String, String> = std::env::vars().collect();

  env.insert(ENV_INSTALL_DIR.to_string(), options.install_prefix.display().to_string());
  env.insert(ENV_PLATFORM.to_string(), options.target.platform.to_string());
  env.insert(ENV_CONFIGURATION.to_string(), options.target.configuration.to_string());
  env.insert(ENV_BUILD_ID.to_string(), build_id.to_string());

  for node in &tree.nodes {
    env.insert(dep_var_name(&node.name), node.root.display().to_string());
  }

  // Tools installed by dependencies become invocable during later steps.
  let bin = options.install_prefix.join("bin");
  let mut paths: Vec<PathBuf> = vec![bin];
  if let Some(existing) = env.get("PATH") {
    paths.extend(std::env::split_paths(existing));
  }
  if let Ok(joined) = std::env::join_paths(paths) {
    env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
  }

  env
}

/// `zlib-ng` → `CRANK_DEP_ZLIB_NG`
pub fn dep_var_name(name: &str) -> String {
  let sanitized: String = name
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() {
        c.to_ascii_uppercase()
      } else {
        '_'
      }
    })
    .collect();
  format!("{ENV_DEP_PREFIX}{sanitized}")
}
