//! Decoder configuration: search-width, pruning and feature-weight knobs,
//! loadable from and savable to a TOML file.

use serde::{Deserialize, Serialize};

/// All knobs that change the decoder's search behavior or scoring, without
/// touching the model data (alignment table, language model) itself.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Maximum hypotheses kept per stack (histogram pruning width).
    pub stack_size: usize,
    /// Threshold pruning factor in `(0, 1)`; `1.0` (or anything outside the
    /// open interval) disables threshold pruning entirely.
    pub prune_threshold: f64,
    /// Per-feature weights applied to a translation option's score vector.
    pub t_weights: Vec<f64>,
    /// Weight applied to the language-model contribution.
    pub lm_weight: f64,
    /// Weight applied to the distortion (reordering) contribution.
    pub d_weight: f64,
    /// Maximum absolute jump distance allowed between consecutive source
    /// spans; `None` means unconstrained.
    pub distortion_limit: Option<u32>,
    /// Whether discontiguous (skip-gram) source patterns may be used.
    pub allow_skipgrams: bool,
    /// Additional per-hypothesis penalty while unresolved target gaps
    /// remain open, discouraging the gappy search path from crowding out
    /// plain left-to-right derivations of the same coverage.
    pub gappy_stack_penalty: f64,
    /// `0` = quiet, higher values log more search detail.
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stack_size: 100,
            prune_threshold: 1.0,
            t_weights: vec![1.0],
            lm_weight: 1.0,
            d_weight: 1.0,
            distortion_limit: None,
            allow_skipgrams: true,
            gappy_stack_penalty: 0.0,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let config = Config::default();
        let text = config.to_toml_string().unwrap();
        let back = Config::from_toml_str(&text).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn distortion_limit_is_optional_in_toml() {
        let text = "stack_size = 50\nprune_threshold = 1.0\nt_weights = [1.0]\nlm_weight = 1.0\nd_weight = 1.0\nallow_skipgrams = false\ngappy_stack_penalty = 0.0\nverbosity = 0\n";
        let config = Config::from_toml_str(text).unwrap();
        assert_eq!(config.distortion_limit, None);
        assert!(!config.allow_skipgrams);
    }
}
