//! Evolution core
//!
//! Ties the pieces of the search together:
//! - [`PopulationStore`] ranks evaluated programs by a primary metric
//! - [`PromptBuilder`] shows the generator a parent and its inspirations
//! - [`Generator`] proposes SEARCH/REPLACE diffs
//! - [`EvolutionController`] patches, evaluates and keeps or discards each
//!   candidate, one generation at a time
//!
//! # Example
//!
//! ```rust,ignore
//! use evo_core::{EvolutionController, EvolveConfig, OpenAiGenerator};
//! use evo_program::Program;
//! use evo_sandbox::SandboxEvaluator;
//!
//! let config = EvolveConfig::new().with_env_overrides();
//! let generator = OpenAiGenerator::from_config(&config.generator)?;
//! let evaluator = SandboxEvaluator::python("eval.py");
//!
//! let mut controller = EvolutionController::from_config(&config, generator, evaluator);
//! controller.initialize(Program::load("seed.py")?).await?;
//! let summary = controller.run(config.generations).await;
//! println!("best: {:?}", summary.best.map(|e| e.scores().clone()));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod generator;
pub mod population;
pub mod prompt;

pub use config::{EvolveConfig, DEFAULT_GENERATIONS};
pub use controller::{EvolutionController, EvolutionSummary, GenerationOutcome};
pub use error::EvolveError;
pub use generator::{Generator, GeneratorConfig, OpenAiGenerator, DEFAULT_MODEL};
pub use population::{
    PopulationConfig, PopulationEntry, PopulationStore, DEFAULT_INSPIRATIONS,
    DEFAULT_PRIMARY_METRIC,
};
pub use prompt::{PromptBuilder, DEFAULT_SYSTEM_PROMPT};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
