use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use url::Url;

use crate::core::template::RenderCommand;

/// Result of one renderer invocation that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub success: bool,
    pub exit_code: i32,
    /// Wall-clock seconds spent inside the process call only.
    pub duration: f64,
    /// Captured stdout followed by stderr.
    pub output: String,
    pub file_size: Option<u64>,
}

impl RenderOutcome {
    /// Last non-empty line of the captured output.
    pub fn final_output(&self) -> &str {
        self.output
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
    }
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Failed to prepare output file {path}: {source}")]
    Prepare {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start renderer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Renderer did not finish within {}s", .after.as_secs_f64())]
    Timeout { after: Duration },
}

/// Runs the external renderer for a single job.
#[derive(Debug, Clone)]
pub struct RenderInvoker {
    timeout: Duration,
}

impl RenderInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Touch `output_file`, run `command`, relax the file's permissions and
    /// report. Success requires a zero exit status and the output file still
    /// being present afterwards.
    pub async fn invoke(
        &self,
        command: &RenderCommand,
        output_file: &Path,
    ) -> Result<RenderOutcome, InvokeError> {
        touch(output_file).await.map_err(|source| InvokeError::Prepare {
            path: output_file.display().to_string(),
            source,
        })?;

        tracing::debug!(program = %command.program, args = ?command.args.len(), "Spawning renderer");

        let spawned = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(source) => {
                relax_permissions(output_file).await;
                return Err(InvokeError::Spawn {
                    program: command.program.clone(),
                    source,
                });
            }
        };

        let started = Instant::now();
        let waited = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        let duration = started.elapsed().as_secs_f64();

        relax_permissions(output_file).await;

        // Dropping the timed-out future drops the child, which kills it.
        let output = match waited {
            Ok(result) => result.map_err(|source| InvokeError::Spawn {
                program: command.program.clone(),
                source,
            })?,
            Err(_) => {
                tracing::warn!(
                    program = %command.program,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Renderer timed out and was killed"
                );
                return Err(InvokeError::Timeout {
                    after: self.timeout,
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        // Killed by a signal: no exit code.
        let exit_code = output.status.code().unwrap_or(-1);
        let file_size = tokio::fs::metadata(output_file).await.ok().map(|m| m.len());
        let success = exit_code == 0 && file_size.is_some();

        Ok(RenderOutcome {
            success,
            exit_code,
            duration,
            output: combined,
            file_size: if success { file_size } else { None },
        })
    }
}

async fn touch(path: &Path) -> std::io::Result<()> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map(|_| ())
}

#[cfg(unix)]
async fn relax_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to relax permissions on {}: {}", path.display(), e);
        }
    }
}

#[cfg(not(unix))]
async fn relax_permissions(_path: &Path) {}

const REDACTED: &str = "***";

const SENSITIVE_PARAMS: &[&str] = &[
    "key",
    "apikey",
    "api_key",
    "token",
    "access_token",
    "password",
    "secret",
    "auth",
    "signature",
    "sig",
];

const SENSITIVE_FLAG_PARTS: &[&str] = &["password", "secret", "token", "cookie", "auth", "header"];

/// Render a command line for logs and error payloads with credentials
/// removed: URL userinfo, sensitive query parameters and the value that
/// follows a sensitive-looking flag. Whitespace is kept as it was.
pub fn sanitize_command(command_line: &str) -> String {
    let mut redact_next = 0usize;
    segments(command_line)
        .map(|part| {
            if part.starts_with(char::is_whitespace) {
                return part.to_string();
            }
            if redact_next > 0 {
                redact_next -= 1;
                return REDACTED.to_string();
            }
            if let Some(flag) = part.strip_prefix("--") {
                let (name, inline_value) = match flag.split_once('=') {
                    Some((name, value)) => (name, Some(value)),
                    None => (flag, None),
                };
                if is_sensitive_flag(name) {
                    return match inline_value {
                        Some(_) => format!("--{}={}", name, REDACTED),
                        None => {
                            // `--custom-header <name> <value>` takes two.
                            redact_next = if name.contains("header") { 2 } else { 1 };
                            part.to_string()
                        }
                    };
                }
            }
            sanitize_token(part).unwrap_or_else(|| part.to_string())
        })
        .collect()
}

/// Scrub URL credentials out of free-form renderer output. Renderers tend to
/// echo the page they load, so this runs before output leaves the process.
pub fn sanitize_output(output: &str) -> String {
    segments(output)
        .map(|part| sanitize_token(part).unwrap_or_else(|| part.to_string()))
        .collect()
}

/// Alternating runs of whitespace and non-whitespace covering all of `text`.
fn segments(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let blank = rest.chars().next()?.is_whitespace();
        let end = rest
            .find(|c: char| c.is_whitespace() != blank)
            .unwrap_or(rest.len());
        let (segment, tail) = rest.split_at(end);
        rest = tail;
        Some(segment)
    })
}

/// Like [`sanitize_url`], but also finds a URL wrapped in quotes, brackets
/// or trailing punctuation (`"https://..."`, `(https://...),`).
fn sanitize_token(token: &str) -> Option<String> {
    if let Some(clean) = sanitize_url(token) {
        return Some(clean);
    }

    let sep = token.find("://")?;
    let start = token[..sep]
        .char_indices()
        .rev()
        .find(|&(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
        .map_or(0, |(i, c)| i + c.len_utf8());
    let body = &token[start..];
    let end = body
        .trim_end_matches(['"', '\'', ')', ']', '>', ',', ';', '.'])
        .len();
    let clean = sanitize_url(&body[..end])?;
    Some(format!("{}{}{}", &token[..start], clean, &body[end..]))
}

fn is_sensitive_flag(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_FLAG_PARTS.iter().any(|p| name.contains(p))
}

/// `None` when `part` is not a URL or carries nothing to redact.
fn sanitize_url(part: &str) -> Option<String> {
    let mut url = Url::parse(part).ok()?;
    if !url.has_host() {
        return None;
    }

    // Tokens are often carried as a bare username (`https://<token>@host`).
    let mut changed = false;
    if !url.username().is_empty() {
        url.set_username(REDACTED).ok()?;
        changed = true;
    }
    if url.password().is_some() {
        url.set_password(Some(REDACTED)).ok()?;
        changed = true;
    }

    if url.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                if SENSITIVE_PARAMS.contains(&k.to_ascii_lowercase().as_str()) {
                    changed = true;
                    (k.into_owned(), REDACTED.to_string())
                } else {
                    (k.into_owned(), v.into_owned())
                }
            })
            .collect();
        if changed {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    changed.then(|| url.to_string())
}
