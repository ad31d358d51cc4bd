// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Config file locations, lowest to highest priority.  A later layer's
/// scalar values override an earlier layer's; mappings are deep-merged.
///
/// 1. `~/.config/forge/config.yaml` (or the platform config dir)
/// 2. `.forge/config.yaml` then `forge.yaml` in the working directory
/// 3. `$FORGE_CONFIG` (tilde-expanded)
/// 4. the explicit `extra` path, when given
fn discover_layers(extra: Option<&Path>) -> Vec<PathBuf> {
    let mut layers = Vec::new();
    for dir in [dirs::home_dir().map(|h| h.join(".config")), dirs::config_dir()]
        .into_iter()
        .flatten()
    {
        for name in ["config.yaml", "config.yml"] {
            layers.push(dir.join("forge").join(name));
        }
    }
    for local in [".forge/config.yaml", ".forge/config.yml", "forge.yaml", "forge.yml"] {
        layers.push(PathBuf::from(local));
    }
    if let Ok(p) = std::env::var("FORGE_CONFIG") {
        layers.push(PathBuf::from(shellexpand::tilde(&p).into_owned()));
    }
    layers.extend(extra.map(Path::to_path_buf));
    layers
}

/// Load configuration by merging all discovered YAML layers.
///
/// Discovered layers that do not exist are skipped silently; the explicit
/// `extra` path must exist.  With no layers at all, defaults apply.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged: Option<serde_yaml::Value> = None;

    for path in discover_layers(extra) {
        let required = extra == Some(path.as_path());
        if !path.is_file() && !required {
            continue;
        }
        debug!(path = %path.display(), "loading config layer");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        merged = Some(match merged.take() {
            None => layer,
            Some(mut base) => {
                merge_layer(&mut base, layer);
                base
            }
        });
    }

    match merged {
        None => Ok(Config::default()),
        Some(value) => {
            serde_yaml::from_value(value).context("config did not match the expected schema")
        }
    }
}

/// Deep-merge `layer` into `base`; layer wins on scalar conflicts.
fn merge_layer(base: &mut serde_yaml::Value, layer: serde_yaml::Value) {
    match (base, layer) {
        (serde_yaml::Value::Mapping(b), serde_yaml::Value::Mapping(l)) => {
            for (key, value) in l {
                match b.get_mut(&key) {
                    Some(existing) => merge_layer(existing, value),
                    None => {
                        b.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
