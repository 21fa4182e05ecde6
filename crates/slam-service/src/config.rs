//! Configuration loading (spec §6, SPEC_FULL.md §6): a `HashMap<String,
//! String>` options map is the primary contract; an optional `slam.toml`
//! file layer supplies defaults for keys missing from it, mirroring
//! `bvrd`'s CLI-overrides-file pattern (`FileConfig::load`).

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use types::{CartoAlgoConfig, InitialPose};

use crate::error::ServiceError;

/// Optional `slam.toml` defaults layer. Any key present in the CLI/options
/// map always wins over this file.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub options: HashMap<String, String>,
}

impl FileConfig {
    /// Load `path` if it exists; a missing file is not an error, the same
    /// way `bvrd::FileConfig::load` falls back to defaults and logs a
    /// warning rather than failing the daemon.
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ServiceError::InvalidConfig(format!("{}: {e}", path.display())))?;
            toml::from_str(&content)
                .map_err(|e| ServiceError::InvalidConfig(format!("{}: {e}", path.display())))
        } else {
            warn!(path = %path.display(), "slam config file not found, using defaults");
            Ok(FileConfig::default())
        }
    }

    /// Merge the file layer's options under a CLI/options map (CLI values win).
    pub fn merged_options(&self, cli_options: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.options.clone();
        merged.extend(cli_options.clone());
        merged
    }
}

/// Parse the options map (spec §6 table) into a [`CartoAlgoConfig`].
/// Unknown keys are logged and ignored; malformed numeric values are a
/// construction-time error.
pub fn parse_algo_config(options: &HashMap<String, String>) -> Result<CartoAlgoConfig, ServiceError> {
    let mut cfg = CartoAlgoConfig::default();

    for (key, value) in options {
        match key.as_str() {
            "mode" => {
                if value != "2d" {
                    return Err(ServiceError::UnsupportedMode(value.clone()));
                }
            }
            "optimize_on_start" => cfg.optimize_on_start = parse_bool(key, value)?,
            "optimize_every_n_nodes" => cfg.optimize_every_n_nodes = parse_num(key, value)?,
            "num_range_data" => cfg.num_range_data = parse_num(key, value)?,
            "missing_data_ray_length" | "missing_data_ray_length_meters" => {
                cfg.missing_data_ray_length_meters = parse_num(key, value)?
            }
            "max_range" | "max_range_meters" => cfg.max_range_meters = parse_num(key, value)?,
            "min_range" | "min_range_meters" => cfg.min_range_meters = parse_num(key, value)?,
            "max_submaps_to_keep" => cfg.max_submaps_to_keep = parse_num(key, value)?,
            "fresh_submaps_count" => cfg.fresh_submaps_count = parse_num(key, value)?,
            "min_covered_area" | "min_covered_area_meters_squared" => {
                cfg.min_covered_area_meters_squared = parse_num(key, value)?
            }
            "min_added_submaps_count" => cfg.min_added_submaps_count = parse_num(key, value)?,
            "occupied_space_weight" => cfg.occupied_space_weight = parse_num(key, value)?,
            "translation_weight" => cfg.translation_weight = parse_num(key, value)?,
            "rotation_weight" => cfg.rotation_weight = parse_num(key, value)?,
            "use_imu_data" => cfg.use_imu_data = parse_bool(key, value)?,
            "initial_starting_pose" => cfg.initial_starting_pose = Some(parse_initial_pose(value)?),
            other => {
                warn!(key = other, value, "unknown slam config key, ignoring");
            }
        }
    }

    Ok(cfg)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ServiceError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ServiceError::InvalidConfig(format!("{key}: not a bool: {value}"))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ServiceError> {
    value
        .parse()
        .map_err(|_| ServiceError::InvalidConfig(format!("{key}: bad numeric value: {value}")))
}

/// Parse `"X:<f>, Y:<f>, Theta:<f>"` (spec §6) into an [`InitialPose`].
fn parse_initial_pose(value: &str) -> Result<InitialPose, ServiceError> {
    let re = Regex::new(r"X:\s*(-?[0-9.]+),\s*Y:\s*(-?[0-9.]+),\s*Theta:\s*(-?[0-9.]+)")
        .expect("static regex is valid");
    let caps = re
        .captures(value)
        .ok_or_else(|| ServiceError::InvalidConfig(format!("initial_starting_pose: bad format: {value}")))?;
    let get = |i: usize| -> Result<f64, ServiceError> {
        caps[i]
            .parse()
            .map_err(|_| ServiceError::InvalidConfig(format!("initial_starting_pose: bad number in: {value}")))
    };
    Ok(InitialPose { x: get(1)?, y: get(2)?, theta: get(3)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let cfg = parse_algo_config(&HashMap::new()).unwrap();
        assert_eq!(cfg, CartoAlgoConfig::default());
    }

    #[test]
    fn test_overrides_numeric_keys() {
        let mut options = HashMap::new();
        options.insert("optimize_every_n_nodes".to_string(), "7".to_string());
        options.insert("max_range_meters".to_string(), "30.5".to_string());
        let cfg = parse_algo_config(&options).unwrap();
        assert_eq!(cfg.optimize_every_n_nodes, 7);
        assert!((cfg.max_range_meters - 30.5).abs() < 1e-9);
    }

    #[test]
    fn test_alias_keys_without_meters_suffix() {
        let mut options = HashMap::new();
        options.insert("max_range".to_string(), "10.0".to_string());
        options.insert("min_range".to_string(), "0.5".to_string());
        let cfg = parse_algo_config(&options).unwrap();
        assert!((cfg.max_range_meters - 10.0).abs() < 1e-9);
        assert!((cfg.min_range_meters - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bad_numeric_value_is_invalid_config() {
        let mut options = HashMap::new();
        options.insert("num_range_data".to_string(), "not-a-number".to_string());
        assert!(matches!(parse_algo_config(&options), Err(ServiceError::InvalidConfig(_))));
    }

    #[test]
    fn test_unsupported_mode_rejected() {
        let mut options = HashMap::new();
        options.insert("mode".to_string(), "3d".to_string());
        assert!(matches!(parse_algo_config(&options), Err(ServiceError::UnsupportedMode(_))));
    }

    #[test]
    fn test_unknown_key_is_ignored() {
        let mut options = HashMap::new();
        options.insert("totally_unknown_key".to_string(), "42".to_string());
        assert!(parse_algo_config(&options).is_ok());
    }

    #[test]
    fn test_initial_starting_pose_parses() {
        let mut options = HashMap::new();
        options.insert("initial_starting_pose".to_string(), "X:1.5, Y:-2.25, Theta:0.78".to_string());
        let cfg = parse_algo_config(&options).unwrap();
        let pose = cfg.initial_starting_pose.unwrap();
        assert!((pose.x - 1.5).abs() < 1e-9);
        assert!((pose.y + 2.25).abs() < 1e-9);
        assert!((pose.theta - 0.78).abs() < 1e-9);
    }

    #[test]
    fn test_merged_options_cli_wins() {
        let file = FileConfig {
            options: HashMap::from([("num_range_data".to_string(), "10".to_string())]),
        };
        let cli = HashMap::from([("num_range_data".to_string(), "99".to_string())]);
        let merged = file.merged_options(&cli);
        assert_eq!(merged.get("num_range_data").unwrap(), "99");
    }
}
