use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayoutDirection {
    Down,
    Right,
}

impl LayoutDirection {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "DOWN" | "TD" | "TB" => Some(Self::Down),
            "RIGHT" | "LR" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutDirection::Down => "DOWN",
            LayoutDirection::Right => "RIGHT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub iterations: usize,
    pub ideal_edge_length: f32,
    pub seed: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            iterations: 120,
            ideal_edge_length: 120.0,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub algorithm: String,
    pub direction: LayoutDirection,
    pub node_spacing: f32,
    pub rank_spacing: f32,
    pub node_min_width: f32,
    pub node_height: f32,
    pub node_padding_x: f32,
    pub char_width: f32,
    pub max_width_multiplier: f32,
    pub collapsed_container_width: f32,
    pub collapsed_container_height: f32,
    pub container_padding: f32,
    pub container_label_height: f32,
    pub min_reasonable_spacing: f32,
    pub max_reasonable_spacing: f32,
    pub fallback: FallbackConfig,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            algorithm: "layered".to_string(),
            direction: LayoutDirection::Down,
            node_spacing: 50.0,
            rank_spacing: 60.0,
            node_min_width: 120.0,
            node_height: 40.0,
            node_padding_x: 16.0,
            char_width: 8.0,
            max_width_multiplier: 2.5,
            collapsed_container_width: 200.0,
            collapsed_container_height: 150.0,
            container_padding: 20.0,
            container_label_height: 28.0,
            min_reasonable_spacing: 5.0,
            max_reasonable_spacing: 2000.0,
            fallback: FallbackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub default_timeout_ms: Option<u64>,
    pub race_retry_attempts: usize,
    pub race_retry_min_delay_ms: u64,
    pub race_retry_max_delay_ms: u64,
    /// Returned/expected container ratio below which a shortfall is treated
    /// as an engine failure rather than a race.
    pub container_deficit_ratio: f32,
    pub fit_view_padding: f32,
    pub fit_view_duration_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: None,
            race_retry_attempts: 3,
            race_retry_min_delay_ms: 10,
            race_retry_max_delay_ms: 200,
            container_deficit_ratio: 0.5,
            fit_view_padding: 0.1,
            fit_view_duration_ms: 300,
        }
    }
}

impl PipelineConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub layout: LayoutConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    layout: Option<LayoutConfigFile>,
    pipeline: Option<PipelineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LayoutConfigFile {
    algorithm: Option<String>,
    direction: Option<String>,
    node_spacing: Option<f32>,
    rank_spacing: Option<f32>,
    node_min_width: Option<f32>,
    node_height: Option<f32>,
    node_padding_x: Option<f32>,
    char_width: Option<f32>,
    max_width_multiplier: Option<f32>,
    collapsed_container_width: Option<f32>,
    collapsed_container_height: Option<f32>,
    container_padding: Option<f32>,
    container_label_height: Option<f32>,
    min_reasonable_spacing: Option<f32>,
    max_reasonable_spacing: Option<f32>,
    fallback_iterations: Option<usize>,
    fallback_edge_length: Option<f32>,
    fallback_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PipelineConfigFile {
    timeout_ms: Option<u64>,
    race_retry_attempts: Option<usize>,
    race_retry_min_delay_ms: Option<u64>,
    race_retry_max_delay_ms: Option<u64>,
    container_deficit_ratio: Option<f32>,
    fit_view_padding: Option<f32>,
    fit_view_duration_ms: Option<u64>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let mut config = Config::default();
    let parsed: ConfigFile = json5::from_str(contents)?;

    if let Some(layout) = parsed.layout {
        let target = &mut config.layout;
        if let Some(v) = layout.algorithm {
            target.algorithm = v;
        }
        if let Some(v) = layout.direction {
            target.direction = LayoutDirection::from_token(&v)
                .ok_or_else(|| anyhow::anyhow!("unknown layout direction '{v}'"))?;
        }
        if let Some(v) = layout.node_spacing {
            target.node_spacing = v;
        }
        if let Some(v) = layout.rank_spacing {
            target.rank_spacing = v;
        }
        if let Some(v) = layout.node_min_width {
            target.node_min_width = v;
        }
        if let Some(v) = layout.node_height {
            target.node_height = v;
        }
        if let Some(v) = layout.node_padding_x {
            target.node_padding_x = v;
        }
        if let Some(v) = layout.char_width {
            target.char_width = v;
        }
        if let Some(v) = layout.max_width_multiplier {
            target.max_width_multiplier = v.max(1.0);
        }
        if let Some(v) = layout.collapsed_container_width {
            target.collapsed_container_width = v;
        }
        if let Some(v) = layout.collapsed_container_height {
            target.collapsed_container_height = v;
        }
        if let Some(v) = layout.container_padding {
            target.container_padding = v;
        }
        if let Some(v) = layout.container_label_height {
            target.container_label_height = v;
        }
        if let Some(v) = layout.min_reasonable_spacing {
            target.min_reasonable_spacing = v;
        }
        if let Some(v) = layout.max_reasonable_spacing {
            target.max_reasonable_spacing = v;
        }
        if let Some(v) = layout.fallback_iterations {
            target.fallback.iterations = v;
        }
        if let Some(v) = layout.fallback_edge_length {
            target.fallback.ideal_edge_length = v;
        }
        if let Some(v) = layout.fallback_seed {
            target.fallback.seed = v;
        }
    }

    if let Some(pipeline) = parsed.pipeline {
        let target = &mut config.pipeline;
        if let Some(v) = pipeline.timeout_ms {
            target.default_timeout_ms = Some(v);
        }
        if let Some(v) = pipeline.race_retry_attempts {
            target.race_retry_attempts = v.max(1);
        }
        if let Some(v) = pipeline.race_retry_min_delay_ms {
            target.race_retry_min_delay_ms = v;
        }
        if let Some(v) = pipeline.race_retry_max_delay_ms {
            target.race_retry_max_delay_ms = v;
        }
        if let Some(v) = pipeline.container_deficit_ratio {
            target.container_deficit_ratio = v.clamp(0.0, 1.0);
        }
        if let Some(v) = pipeline.fit_view_padding {
            target.fit_view_padding = v;
        }
        if let Some(v) = pipeline.fit_view_duration_ms {
            target.fit_view_duration_ms = v;
        }
    }

    Ok(config)
}
