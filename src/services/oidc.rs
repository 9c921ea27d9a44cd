//! OIDC credential binding.
//!
//! The actual token exchange lives outside the core (vault, cloud STS);
//! the engine's seam is narrow: given a task's `oidc` binding, locate the
//! ambient identity token, materialise it as a file, and hand the task an
//! environment pointing at it. Temp files created here are tracked and
//! removed on every task exit path via [`OidcTempFiles`]'s `Drop`.

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::error::SykliError;
use crate::graph::OidcBinding;

/// RAII tracker for files materialised during credential exchange.
///
/// Dropping it removes every tracked file; a missing file is not an
/// error (the task may have consumed and deleted it).
#[derive(Debug, Default)]
pub struct OidcTempFiles {
    paths: Vec<PathBuf>,
}

impl OidcTempFiles {
    /// Tracks a file for removal.
    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for OidcTempFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed OIDC temp file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove OIDC temp file")
                }
            }
        }
    }
}

/// Exchanges an OIDC binding for a task environment.
///
/// The ambient identity token is read from `SYKLI_OIDC_TOKEN` (inline) or
/// `SYKLI_OIDC_TOKEN_FILE` (path). The token is written to a private temp
/// file and exposed through provider-conventional variables
/// (`AWS_WEB_IDENTITY_TOKEN_FILE` for `aws`, `SYKLI_OIDC_TOKEN_PATH`
/// otherwise).
pub fn exchange(
    task: &str,
    binding: &OidcBinding,
) -> Result<(Vec<(String, String)>, OidcTempFiles), SykliError> {
    let token = match std::env::var("SYKLI_OIDC_TOKEN") {
        Ok(t) if !t.is_empty() => t,
        _ => match std::env::var("SYKLI_OIDC_TOKEN_FILE") {
            Ok(path) if !path.is_empty() => fs::read_to_string(&path).map_err(|e| {
                SykliError::CredentialExchange(format!(
                    "failed to read token file {}: {}",
                    path, e
                ))
            })?,
            _ => {
                return Err(SykliError::OidcUnavailable(format!(
                    "no ambient identity token for task {:?} (set SYKLI_OIDC_TOKEN or SYKLI_OIDC_TOKEN_FILE)",
                    task
                )));
            }
        },
    };

    let mut tracked = OidcTempFiles::default();
    let token_path = std::env::temp_dir().join(format!("sykli-oidc-{}", uuid::Uuid::new_v4()));
    fs::write(&token_path, token.trim()).map_err(|e| {
        SykliError::CredentialExchange(format!(
            "failed to write token file {}: {}",
            token_path.display(),
            e
        ))
    })?;
    tracked.track(token_path.clone());

    let mut env = vec![("SYKLI_OIDC_PROVIDER".to_string(), binding.provider.clone())];
    if let Some(audience) = &binding.audience {
        env.push(("SYKLI_OIDC_AUDIENCE".to_string(), audience.clone()));
    }
    let token_var = match binding.provider.as_str() {
        "aws" => "AWS_WEB_IDENTITY_TOKEN_FILE",
        _ => "SYKLI_OIDC_TOKEN_PATH",
    };
    env.push((
        token_var.to_string(),
        token_path.to_string_lossy().into_owned(),
    ));

    debug!(task, provider = %binding.provider, "exchanged OIDC binding");
    Ok((env, tracked))
}
