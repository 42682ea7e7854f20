//! Run configuration
//!
//! Loaded from TOML, then overridden by `MODEL_ID`, `BASE_URL` and `API_KEY`
//! from the environment, then by command-line flags. The binary loads a
//! `.env` file into the environment first; variables already set win.
//!
//! ```toml
//! generations = 10
//! diff_policy = "strict"
//!
//! [population]
//! primary_metric = "accuracy"
//!
//! [sandbox]
//! timeout_secs = 60
//!
//! [runtime]
//! kind = "python"
//! interpreter = "python3.12"
//!
//! [generator]
//! model = "gpt-4o-mini"
//! ```

use crate::error::EvolveError;
use crate::generator::{GeneratorConfig, API_KEY_ENV, BASE_URL_ENV, MODEL_ENV};
use crate::population::PopulationConfig;
use evo_program::ApplyPolicy;
use evo_sandbox::{RuntimeSpec, SandboxConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default number of generations
pub const DEFAULT_GENERATIONS: usize = 5;

/// Evolution run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolveConfig {
    /// Generations to run
    pub generations: usize,
    /// How unresolved diff operations are treated
    pub diff_policy: ApplyPolicy,
    /// Ranking settings
    pub population: PopulationConfig,
    /// Worker limits and isolation
    pub sandbox: SandboxConfig,
    /// Worker runtime
    pub runtime: RuntimeSpec,
    /// Generator endpoint
    pub generator: GeneratorConfig,
}

impl Default for EvolveConfig {
    fn default() -> Self {
        Self {
            generations: DEFAULT_GENERATIONS,
            diff_policy: ApplyPolicy::default(),
            population: PopulationConfig::default(),
            sandbox: SandboxConfig::default(),
            runtime: RuntimeSpec::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl EvolveConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not valid configuration
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EvolveError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EvolveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)
            .map_err(|e| EvolveError::config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns error if the text is not valid configuration
    pub fn from_toml(text: &str) -> Result<Self, EvolveError> {
        toml::from_str(text).map_err(|e| EvolveError::config(e.to_string()))
    }

    /// Apply `MODEL_ID`, `BASE_URL` and `API_KEY` from the process environment
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `MODEL_ID`, `BASE_URL` and `API_KEY` from a dotenv file
    ///
    /// The process environment is left untouched.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or a line does not parse
    pub fn with_env_file(self, path: impl AsRef<Path>) -> Result<Self, EvolveError> {
        let path = path.as_ref();
        let vars = dotenvy::from_path_iter(path)
            .and_then(|iter| iter.collect::<Result<HashMap<_, _>, _>>())
            .map_err(|e| EvolveError::config(format!("{}: {e}", path.display())))?;
        Ok(self.with_overrides_from(|key| vars.get(key).cloned()))
    }

    /// Apply generator overrides from a variable lookup
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(model) = lookup(MODEL_ENV).filter(|v| !v.is_empty()) {
            self.generator.model = model;
        }
        if let Some(base_url) = lookup(BASE_URL_ENV) {
            self.generator.base_url = Some(base_url);
        }
        if let Some(api_key) = lookup(API_KEY_ENV) {
            self.generator.api_key = Some(api_key);
        }
        self
    }

    /// With generation count
    #[inline]
    #[must_use]
    pub fn with_generations(mut self, generations: usize) -> Self {
        self.generations = generations;
        self
    }

    /// With diff policy
    #[inline]
    #[must_use]
    pub fn with_diff_policy(mut self, policy: ApplyPolicy) -> Self {
        self.diff_policy = policy;
        self
    }

    /// With primary metric
    #[inline]
    #[must_use]
    pub fn with_primary_metric(mut self, metric: impl Into<String>) -> Self {
        self.population.primary_metric = metric.into();
        self
    }

    /// With evaluation timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox = self.sandbox.with_timeout(timeout);
        self
    }

    /// With worker runtime
    #[inline]
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeSpec) -> Self {
        self.runtime = runtime;
        self
    }

    /// Check values that deserialization cannot
    ///
    /// # Errors
    /// Returns [`EvolveError::Config`] describing the first invalid value
    pub fn validate(&self) -> Result<(), EvolveError> {
        if self.population.primary_metric.trim().is_empty() {
            return Err(EvolveError::config("population.primary_metric is empty"));
        }
        let timeout = self.sandbox.timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(EvolveError::config("sandbox.timeout_secs must be positive"));
        }
        if self.sandbox.max_output_bytes == 0 {
            return Err(EvolveError::config(
                "sandbox.max_output_bytes must be positive",
            ));
        }
        Ok(())
    }
}
