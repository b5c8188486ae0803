//! Pipeline configuration loading for the CLI.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use footscan_core::PipelineConfig;

const CONFIG_PATH_VAR: &str = "FOOTSCAN_CONFIG_PATH";
const CONFIG_JSON_VAR: &str = "FOOTSCAN_CONFIG_JSON";

const CANDIDATES: &[&str] = &[
    "footscan.toml",
    "footscan.json",
    "config/footscan.toml",
    "config/footscan.json",
];

/// Command-line values that win over every file or environment source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub results_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub colmap: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut PipelineConfig) {
        if let Some(dir) = self.results_dir {
            config.storage.results_dir = dir;
        }
        if let Some(dir) = self.work_dir {
            config.storage.work_dir = Some(dir);
        }
        if let Some(colmap) = self.colmap {
            config.reconstruction.colmap_path = colmap;
        }
    }
}

/// Load the pipeline configuration. Evaluation order:
/// 1) `$FOOTSCAN_CONFIG_PATH` (TOML or JSON file),
/// 2) `$FOOTSCAN_CONFIG_JSON` (inline JSON),
/// 3) the first default file found under the working directory,
/// 4) defaults.
///
/// `overrides` are applied on top of whichever source was used.
pub fn load(overrides: Overrides) -> anyhow::Result<PipelineConfig> {
    let cwd = env::current_dir().context("failed to resolve working directory")?;
    load_with(|key| env::var(key).ok(), &cwd, overrides)
}

fn load_with(
    lookup: impl Fn(&str) -> Option<String>,
    base: &Path,
    overrides: Overrides,
) -> anyhow::Result<PipelineConfig> {
    let mut config = if let Some(path) = lookup(CONFIG_PATH_VAR) {
        load_from_file(Path::new(&path))?
    } else if let Some(raw) = lookup(CONFIG_JSON_VAR) {
        parse_json(&raw).with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?
    } else if let Some(path) = find_default_file(base) {
        load_from_file(&path)?
    } else {
        PipelineConfig::default()
    };

    overrides.apply(&mut config);
    Ok(config)
}

fn load_from_file(path: &Path) -> anyhow::Result<PipelineConfig> {
    let contents = fs::read_to_string(path).with_context(|| {
        format!("failed to read footscan config from {}", path.display())
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents)
            .with_context(|| format!("invalid footscan config {}", path.display())),
        Some("toml") => toml::from_str(&contents).map_err(|err| {
            anyhow!("invalid footscan config {}: {}", path.display(), err)
        }),
        _ => parse_from_str(&contents, &path.display().to_string()),
    }
}

fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<PipelineConfig> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            anyhow!(
                "failed to parse footscan config {}: toml error: {}; json error: {}",
                origin,
                toml_err,
                json_err
            )
        })
    })
}

fn parse_json(raw: &str) -> anyhow::Result<PipelineConfig> {
    serde_json::from_str(raw).map_err(|err| anyhow!("invalid footscan config json: {err}"))
}

fn find_default_file(base: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|candidate| base.join(candidate))
        .find(|path| path.is_file())
}
