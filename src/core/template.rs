use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};

use crate::core::config::RenderConfig;
use crate::core::options::ValidatedOptions;

/// Ordered `{name}` → value pairs used for placeholder substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    vars: Vec<(String, String)>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` (without braces). Re-setting a name replaces its value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.vars.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((name.to_string(), value)),
        }
        self
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Replace every `{name}` token whose name is in `vars`. Unknown tokens are
/// left as they are. Substituted values are never scanned again, so a value
/// containing `{hash}` stays literal.
pub fn expand(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if !after[..close].contains('{') => {
                let name = &after[..close];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Date, hash and format tokens shared by every template of a request.
pub fn base_vars(now: &DateTime<Local>, hash: &str, format: &str) -> TemplateVars {
    TemplateVars::new()
        .with("year", now.format("%Y").to_string())
        .with("month", now.format("%m").to_string())
        .with("day", now.format("%d").to_string())
        .with("hour", now.format("%H").to_string())
        .with("minute", now.format("%M").to_string())
        .with("hash", hash)
        .with("format", format)
}

/// Request identifier: sha256 of the URL followed by a microsecond timestamp.
///
/// Two requests for the same URL within the same microsecond collide.
pub fn compute_hash(url: &str, now: &DateTime<Local>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros()).as_bytes());
    hex::encode(hasher.finalize())
}

/// A renderer invocation as a program plus discrete arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Human-readable command line. Never executed.
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub hash: String,
    pub output_dir: PathBuf,
    pub output_file: PathBuf,
    pub image_url: String,
    pub command: RenderCommand,
}

impl RenderJob {
    /// Derive output paths, public URL and renderer command for one request.
    /// Pure: no filesystem access.
    pub fn build(
        config: &RenderConfig,
        url: &str,
        format: &str,
        options: &ValidatedOptions,
        now: &DateTime<Local>,
        hash: &str,
    ) -> Self {
        let vars = base_vars(now, hash, format);

        let output_dir = PathBuf::from(expand(&config.output_format, &vars));
        let output_file = output_dir.join(expand(&config.file_format, &vars));
        let image_url = expand(&config.url_format, &vars);

        let command_vars = vars
            .with("exec", config.exec.to_string_lossy())
            .with("url", url)
            .with("output", output_file.to_string_lossy());

        let command = build_command(&config.command_format, &command_vars, options);

        Self {
            hash: hash.to_string(),
            output_dir,
            output_file,
            image_url,
            command,
        }
    }
}

/// Split the command template on whitespace and expand each token on its
/// own, so user-controlled values always land in a single argument.
pub fn build_command(
    command_format: &str,
    vars: &TemplateVars,
    options: &ValidatedOptions,
) -> RenderCommand {
    let options_string = options.to_options_string();
    let token_vars = vars.clone().with("options", options_string.as_str());

    let mut argv: Vec<String> = Vec::new();
    for token in command_format.split_whitespace() {
        if token == "{options}" {
            argv.extend(options.to_args());
            continue;
        }
        let expanded = expand(token, &token_vars);
        if !expanded.is_empty() {
            argv.push(expanded);
        }
    }

    let mut argv = argv.into_iter();
    let program = argv.next().unwrap_or_default();

    RenderCommand {
        program,
        args: argv.collect(),
        display: expand(command_format, &token_vars),
    }
}

/// Create `dir` and its parents. An existing directory, including one created
/// concurrently by another request, is not an error.
pub async fn ensure_output_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}
