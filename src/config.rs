use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Error};
use serde::{Deserialize, Serialize};

/// What to build: the base to append onto, where to push the result, and the
/// settings of the layer builder's data retrieval.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct ContainConfig {
    pub base: String,

    /// Destination reference. May be left out of the file and supplied later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default, alias = "podselector", skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, alias = "getattemptsmax", skip_serializing_if = "Option::is_none")]
    pub get_attempts_max: Option<u32>,

    /// A duration such as `500ms`, `2s` or `1m`.
    #[serde(default, alias = "getattemptswait", skip_serializing_if = "Option::is_none")]
    pub get_attempts_wait: Option<String>,
}

impl SyncConfig {
    pub fn get_attempts_wait(&self) -> Result<Option<Duration>, Error> {
        self.get_attempts_wait
            .as_deref()
            .map(parse_duration)
            .transpose()
    }
}

fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    let value: u64 = value
        .parse()
        .with_context(|| format!("Invalid duration {:?}", s))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        other => bail!("Unknown unit {:?} in duration {:?}, use ms, s or m", other, s),
    }
}

impl ContainConfig {
    /// Reads a config file, as json when the extension says so and yaml otherwise.
    pub fn parse_file(f: impl AsRef<Path>) -> Result<ContainConfig, Error> {
        let path = f.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Reading config file {:?}", path))?;

        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let u: ContainConfig = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Parsing json config {:?}", path))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Parsing yaml config {:?}", path))?
        };
        Ok(u)
    }
}
