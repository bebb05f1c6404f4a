use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, TimeZone};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::core::options::AllowedOptionSpec;

const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 60;

/// Deployment-wide render configuration. Immutable once loaded.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    /// Path of the external renderer executable.
    pub exec: PathBuf,

    /// Output directory template.
    pub output_format: String,

    /// Output file name template, relative to the output directory.
    pub file_format: String,

    /// Renderer command template; `{exec}`, `{options}`, `{url}` and
    /// `{output}` are available in addition to the shared tokens.
    pub command_format: String,

    /// Public URL template for the produced artifact.
    pub url_format: String,

    #[serde(default)]
    pub allowed_options: Vec<AllowedOptionSpec>,

    /// How long artifacts are advertised as valid. Reported, not enforced.
    pub expiration: Expiration,

    #[serde(default)]
    pub virustotal: VirusTotalConfig,

    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,

    /// Upper bound on renders running at once. Unbounded when absent.
    #[serde(default)]
    pub max_concurrent_renders: Option<usize>,
}

fn default_render_timeout_secs() -> u64 {
    DEFAULT_RENDER_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
pub struct VirusTotalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub api_key: SecretString,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-request timeout for reputation lookups, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl Default for VirusTotalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: empty_secret(),
            base_url: None,
            timeout_secs: None,
        }
    }
}

impl RenderConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read render config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid render config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| anyhow!("{}", e))
    }

    /// Startup checks. The executable must exist before any request is served.
    pub fn validate(&self) -> Result<()> {
        if !self.exec.exists() {
            bail!("Executable file not found: {}", self.exec.display());
        }
        for token in ["{exec}", "{output}"] {
            if !self.command_format.contains(token) {
                bail!("commandFormat must contain {}", token);
            }
        }
        if self.render_timeout_secs == 0 {
            bail!("renderTimeoutSecs must be greater than zero");
        }
        if self.max_concurrent_renders == Some(0) {
            bail!("maxConcurrentRenders must be greater than zero");
        }
        if self.virustotal.enabled && self.virustotal.api_key.expose_secret().is_empty() {
            bail!("virustotal.api_key is required when virustotal is enabled");
        }
        Ok(())
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(exec: &str, output_format: &str) -> Self {
        Self {
            exec: PathBuf::from(exec),
            output_format: output_format.to_string(),
            file_format: "{hash}.{format}".to_string(),
            command_format: "{exec} {options} {url} -o {output}".to_string(),
            url_format: "http://cdn.local/{year}/{month}/{hash}.{format}".to_string(),
            allowed_options: Vec::new(),
            expiration: "+1 day".parse().unwrap(),
            virustotal: VirusTotalConfig::default(),
            render_timeout_secs: DEFAULT_RENDER_TIMEOUT_SECS,
            max_concurrent_renders: None,
        }
    }
}

/// Relative time expression such as `+1 day` or `12 hours`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Expiration {
    seconds: i64,
}

impl Expiration {
    pub fn as_seconds(&self) -> i64 {
        self.seconds
    }

    /// Unix timestamp at which an artifact created at `now` expires.
    pub fn expires_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> i64 {
        now.timestamp() + self.seconds
    }
}

impl FromStr for Expiration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('+').unwrap_or(trimmed).trim_start();

        let split = body
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(body.len());
        let (amount, unit) = body.split_at(split);
        let amount: i64 = amount
            .parse()
            .map_err(|_| anyhow!("Invalid expiration '{}': expected '+<n> <unit>'", s))?;

        let unit_seconds = match unit.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            "w" | "week" | "weeks" => 604_800,
            "month" | "months" => 30 * 86_400,
            "y" | "year" | "years" => 365 * 86_400,
            other => bail!("Invalid expiration '{}': unknown unit '{}'", s, other),
        };

        let seconds = amount
            .checked_mul(unit_seconds)
            .ok_or_else(|| anyhow!("Invalid expiration '{}': out of range", s))?;
        Ok(Self { seconds })
    }
}

impl TryFrom<String> for Expiration {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::OptionType;
    use chrono::Utc;

    const SAMPLE: &str = r#"{
        "exec": "/usr/local/bin/wkhtmltoimage",
        "outputFormat": "/var/renders/{year}/{month}/{day}",
        "fileFormat": "{hash}.{format}",
        "commandFormat": "{exec} {options} {url} {output}",
        "urlFormat": "https://renders.example.com/{year}/{month}/{day}/{hash}.{format}",
        "allowedOptions": [
            { "key": "width", "type": "Number", "boundaries": { "min": 100, "max": 2000 } },
            { "key": "images", "type": "Boolean", "changeTo": { "true": "images", "false": "no-images" } },
            { "key": "title", "type": "String" }
        ],
        "expiration": "+1 week",
        "virustotal": { "enabled": true, "api_key": "s3cr3t" }
    }"#;

    #[test]
    fn parses_full_config() {
        let config = RenderConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.allowed_options.len(), 3);
        assert_eq!(config.allowed_options[0].kind, OptionType::Number);
        assert_eq!(
            config.allowed_options[1].change_to.as_ref().unwrap().false_key,
            "no-images"
        );
        assert_eq!(config.expiration.as_seconds(), 604_800);
        assert_eq!(config.render_timeout_secs, 60);
        assert!(config.virustotal.enabled);
        assert_eq!(config.virustotal.api_key.expose_secret(), "s3cr3t");
    }

    #[test]
    fn debug_output_hides_api_key() {
        let config = RenderConfig::from_json(SAMPLE).unwrap();
        assert!(!format!("{:?}", config).contains("s3cr3t"));
    }

    #[test]
    fn missing_executable_fails_validation() {
        let config = RenderConfig::from_json(SAMPLE).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Executable file not found"));
    }

    #[test]
    fn expiration_expressions() {
        assert_eq!("+1 day".parse::<Expiration>().unwrap().as_seconds(), 86_400);
        assert_eq!("2 hours".parse::<Expiration>().unwrap().as_seconds(), 7_200);
        assert_eq!("+30minutes".parse::<Expiration>().unwrap().as_seconds(), 1_800);
        assert!("tomorrow".parse::<Expiration>().is_err());
        assert!("+1 fortnight".parse::<Expiration>().is_err());

        let now = Utc::now();
        let exp: Expiration = "+1 hour".parse().unwrap();
        assert_eq!(exp.expires_at(&now), now.timestamp() + 3_600);
    }

    #[test]
    fn bad_expiration_rejects_config() {
        let raw = SAMPLE.replace("+1 week", "soon");
        assert!(RenderConfig::from_json(&raw).is_err());
    }
}
