//! Archive transport: turns a source URL into bytes.
//!
//! HTTP semantics (redirects, status handling) are reqwest's business; this
//! module only classifies outcomes so the cache can tell an auth failure
//! from a missing archive from a transient fault. `file://` URLs serve local
//! package stores and keep the test suite off the network.

use std::path::Path;

use tracing::debug;

use super::FetchError;

/// Download the bytes behind `url`, optionally authenticating with a bearer
/// token.
pub(crate) async fn download(client: &reqwest::Client, url: &str, token: Option<&str>) -> Result<Vec<u8>, FetchError> {
  let Some((scheme, rest)) = url.split_once("://") else {
    return Err(FetchError::UnsupportedScheme {
      url: url.to_string(),
      scheme: String::new(),
    });
  };

  match scheme {
    "http" | "https" => download_http(client, url, token).await,
    "file" => download_file(url, rest).await,
    other => Err(FetchError::UnsupportedScheme {
      url: url.to_string(),
      scheme: other.to_string(),
    }),
  }
}

async fn download_http(client: &reqwest::Client, url: &str, token: Option<&str>) -> Result<Vec<u8>, FetchError> {
  let mut request = client.get(url);
  if let Some(token) = token {
    request = request.bearer_auth(token);
  }

  let response = request.send().await.map_err(|err| FetchError::Transport {
    url: url.to_string(),
    message: err.to_string(),
  })?;

  classify_status(url, response.status().as_u16())?;

  let bytes = response.bytes().await.map_err(|err| FetchError::Transport {
    url: url.to_string(),
    message: err.to_string(),
  })?;

  debug!(url = %url, size = bytes.len(), "download complete");
  Ok(bytes.to_vec())
}

async fn download_file(url: &str, path: &str) -> Result<Vec<u8>, FetchError> {
  match tokio::fs::read(Path::new(path)).await {
    Ok(bytes) => {
      debug!(url = %url, size = bytes.len(), "read local archive");
      Ok(bytes)
    }
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(FetchError::NotFound { url: url.to_string() }),
    Err(err) => Err(FetchError::Transport {
      url: url.to_string(),
      message: err.to_string(),
    }),
  }
}

/// Map an HTTP status to a fetch outcome. Auth failures and missing archives
/// are terminal; everything else non-successful is a (retryable) transport
/// fault.
pub(crate) fn classify_status(url: &str, status: u16) -> Result<(), FetchError> {
  match status {
    200..=299 => Ok(()),
    401 | 403 => Err(FetchError::Auth {
      url: url.to_string(),
      status,
    }),
    404 | 410 => Err(FetchError::NotFound { url: url.to_string() }),
    _ => Err(FetchError::Transport {
      url: url.to_string(),
      message: format!("HTTP {status}"),
    }),
  }
}
