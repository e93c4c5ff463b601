use anyhow::{bail, Context, Error};
use serde_json::Value;

use crate::digest::Digest;

/// Returns new config bytes with `diff_ids` appended to `rootfs.diff_ids`.
///
/// Every other field of the config is carried through untouched. When the
/// config records a history, one empty entry is added per diff id so the
/// history keeps lining up with the layers.
pub fn append_diff_ids(config_bytes: &[u8], diff_ids: &[Digest]) -> Result<Vec<u8>, Error> {
    let mut config: Value =
        serde_json::from_slice(config_bytes).context("Parsing base image config")?;

    let root = match config.as_object_mut() {
        Some(root) => root,
        None => bail!("Image config is not a json object"),
    };

    let rootfs = root
        .entry("rootfs")
        .or_insert_with(|| serde_json::json!({ "type": "layers", "diff_ids": [] }));
    let existing = match rootfs
        .as_object_mut()
        .map(|r| r.entry("diff_ids").or_insert_with(|| Value::Array(vec![])))
    {
        Some(Value::Array(existing)) => existing,
        _ => bail!("Image config has a malformed rootfs section"),
    };
    existing.extend(diff_ids.iter().map(|d| Value::String(d.to_string())));

    if let Some(history) = root.get_mut("history") {
        match history {
            Value::Array(entries) => {
                entries.extend(diff_ids.iter().map(|_| Value::Object(Default::default())))
            }
            Value::Null => (),
            _ => bail!("Image config has a malformed history section"),
        }
    }

    Ok(serde_json::to_vec(&config)?)
}
