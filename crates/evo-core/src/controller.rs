//! Evolution controller
//!
//! Drives the loop strictly sequentially: one parent is sampled, one prompt
//! is sent, one candidate is patched and evaluated per generation.
//!
//! ```text
//! INIT -> { SAMPLE_PARENT -> BUILD_CONTEXT -> REQUEST_MUTATION
//!           -> APPLY_DIFF -> EVALUATE -> (INSERT | DISCARD) }* -> DONE
//! ```
//!
//! Only seed evaluation can fail the run. Every later failure is recorded
//! as a [`GenerationOutcome`] and the loop moves on.

use crate::config::EvolveConfig;
use crate::error::EvolveError;
use crate::generator::Generator;
use crate::population::{PopulationEntry, PopulationStore, DEFAULT_INSPIRATIONS};
use crate::prompt::PromptBuilder;
use chrono::{DateTime, Utc};
use evo_program::{ApplyPolicy, DiffError, Program};
use evo_sandbox::{EvaluationError, ProgramEvaluator, Scores};

/// What happened in one generation
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// Candidate evaluated and added to the population
    Inserted { origin: String, scores: Scores },
    /// Candidate failed evaluation
    Discarded { origin: String, error: EvaluationError },
    /// Strict policy: some diff operations matched nothing
    Rejected { origin: String, unresolved: usize },
    /// Generator returned nothing
    Skipped,
}

impl GenerationOutcome {
    /// Short classification for logs
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inserted { .. } => "inserted",
            Self::Discarded { .. } => "discarded",
            Self::Rejected { .. } => "rejected",
            Self::Skipped => "skipped",
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct EvolutionSummary {
    /// Generations actually executed
    pub generations_run: usize,
    /// Outcome per executed generation, in order
    pub outcomes: Vec<GenerationOutcome>,
    /// Best entry at the end of the run
    pub best: Option<PopulationEntry>,
    /// Final population size
    pub population_size: usize,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
}

impl EvolutionSummary {
    /// Number of outcomes of the given kind
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.outcomes.iter().filter(|o| o.kind() == kind).count()
    }
}

/// Runs the evolutionary search
#[derive(Debug)]
pub struct EvolutionController<G, E> {
    generator: G,
    evaluator: E,
    store: PopulationStore,
    prompt: PromptBuilder,
    policy: ApplyPolicy,
    inspirations: usize,
}

impl<G, E> EvolutionController<G, E>
where
    G: Generator,
    E: ProgramEvaluator,
{
    /// Create controller with default settings
    #[must_use]
    pub fn new(generator: G, evaluator: E) -> Self {
        Self {
            generator,
            evaluator,
            store: PopulationStore::new(),
            prompt: PromptBuilder::default(),
            policy: ApplyPolicy::default(),
            inspirations: DEFAULT_INSPIRATIONS,
        }
    }

    /// Create controller from run configuration
    #[must_use]
    pub fn from_config(config: &EvolveConfig, generator: G, evaluator: E) -> Self {
        Self::new(generator, evaluator)
            .with_policy(config.diff_policy)
            .with_primary_metric(config.population.primary_metric.clone())
            .with_inspirations(config.population.inspirations)
    }

    /// With diff policy
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: ApplyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// With primary metric
    #[inline]
    #[must_use]
    pub fn with_primary_metric(mut self, metric: impl Into<String>) -> Self {
        self.store.set_primary_metric(metric);
        self
    }

    /// With inspirations per prompt
    #[inline]
    #[must_use]
    pub fn with_inspirations(mut self, n: usize) -> Self {
        self.inspirations = n;
        self
    }

    /// With prompt builder
    #[inline]
    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    /// Generator
    #[inline]
    #[must_use]
    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Evaluator
    #[inline]
    #[must_use]
    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Population so far
    #[inline]
    #[must_use]
    pub fn store(&self) -> &PopulationStore {
        &self.store
    }

    /// Best entry so far
    #[inline]
    #[must_use]
    pub fn best(&self) -> Option<&PopulationEntry> {
        self.store.sample()
    }

    /// Evaluate the seed program and add it to the population
    ///
    /// # Errors
    /// Returns [`EvolveError::SeedEvaluation`] if the seed fails evaluation.
    /// There are no retries.
    pub async fn initialize(&mut self, seed: Program) -> Result<&PopulationEntry, EvolveError> {
        tracing::info!(origin = seed.origin(), "evaluating initial program");
        match self.evaluator.evaluate(&seed).await {
            Ok(scores) => {
                let entry = self.store.add(seed, scores);
                tracing::info!("initialization complete");
                Ok(entry)
            }
            Err(error) => {
                tracing::error!(%error, "initial program failed evaluation");
                Err(EvolveError::SeedEvaluation(error))
            }
        }
    }

    /// Run one generation
    ///
    /// Returns `None` if there is no parent to mutate.
    #[tracing::instrument(skip(self))]
    pub async fn step(&mut self, generation: usize) -> Option<GenerationOutcome> {
        let (parent, prompt) = {
            let Some(parent) = self.store.sample() else {
                tracing::warn!("no programs in population to evolve");
                return None;
            };
            tracing::info!(
                parent = parent.program().origin(),
                hash = %parent.program().hash().short(),
                scores = %parent.scores(),
                "selected parent"
            );
            let inspirations = self.store.inspirations(self.inspirations);
            (parent.program().clone(), self.prompt.build(parent, &inspirations))
        };

        let diff_text = self.generator.generate(&prompt).await;
        if diff_text.is_empty() {
            tracing::warn!("generator returned no diff, skipping generation");
            return Some(GenerationOutcome::Skipped);
        }
        tracing::debug!(diff = %diff_text, "generated diff");

        let origin = format!("generation-{generation}");
        let patched = parent.apply_diff(&diff_text);
        let child = match patched.under(self.policy) {
            Ok(child) => child.with_origin(origin.clone()),
            Err(DiffError::Unresolved { misses }) => {
                tracing::info!(
                    unresolved = misses.len(),
                    "strict diff policy rejected candidate"
                );
                return Some(GenerationOutcome::Rejected {
                    origin,
                    unresolved: misses.len(),
                });
            }
        };

        tracing::info!(hash = %child.hash().short(), "evaluating candidate");
        let outcome = match self.evaluator.evaluate(&child).await {
            Ok(scores) => {
                self.store.add(child, scores.clone());
                GenerationOutcome::Inserted { origin, scores }
            }
            Err(error) => {
                tracing::info!(error = %error, "candidate failed evaluation, discarding");
                GenerationOutcome::Discarded { origin, error }
            }
        };
        Some(outcome)
    }

    /// Run up to `generations` generations
    ///
    /// Generations are numbered from 1. The run stops early if the
    /// population is empty.
    pub async fn run(&mut self, generations: usize) -> EvolutionSummary {
        let started_at = Utc::now();
        tracing::info!(generations, "starting evolution");

        let mut outcomes = Vec::with_capacity(generations);
        for generation in 1..=generations {
            tracing::info!("generation {generation}/{generations}");
            match self.step(generation).await {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }

        let best = self.store.sample().cloned();
        match &best {
            Some(entry) => tracing::info!(
                origin = entry.program().origin(),
                hash = %entry.program().hash().short(),
                scores = %entry.scores(),
                "evolution finished"
            ),
            None => tracing::warn!("evolution finished with an empty population"),
        }

        EvolutionSummary {
            generations_run: outcomes.len(),
            outcomes,
            best,
            population_size: self.store.len(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::MockGenerator;
    use evo_sandbox::EvaluationResult;
    use std::sync::Mutex;

    const SEED: &str = "a\n# EVOLVE-BLOCK-START\nx=1\n# EVOLVE-BLOCK-END\nb\n";

    /// Scores the integer assigned to `x`
    #[derive(Default)]
    struct AssignmentEvaluator {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ProgramEvaluator for AssignmentEvaluator {
        async fn evaluate(&self, program: &Program) -> EvaluationResult {
            self.calls
                .lock()
                .unwrap()
                .push(program.origin().to_string());
            let value = program
                .segment(0)
                .and_then(|s| s.trim().strip_prefix("x="))
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| EvaluationError::Exception("unparseable".to_string()))?;
            Ok(Scores::new().with("average_score", value))
        }
    }

    fn diff(search: &str, replace: &str) -> String {
        format!("<<<<<<< SEARCH\n{search}\n=======\n{replace}\n>>>>>>> REPLACE")
    }

    #[tokio::test]
    async fn step_inserts_improved_child() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| diff("x=1", "x=5"));
        let mut controller = EvolutionController::new(generator, AssignmentEvaluator::default());
        controller
            .initialize(Program::parse("seed", SEED).unwrap())
            .await
            .unwrap();

        let outcome = controller.step(1).await.unwrap();
        assert_eq!(
            outcome,
            GenerationOutcome::Inserted {
                origin: "generation-1".to_string(),
                scores: Scores::new().with("average_score", 5.0),
            }
        );
        assert_eq!(controller.best().unwrap().program().origin(), "generation-1");
    }

    #[tokio::test]
    async fn step_without_population_returns_none() {
        let generator = MockGenerator::new();
        let mut controller = EvolutionController::new(generator, AssignmentEvaluator::default());
        assert!(controller.step(1).await.is_none());
    }

    #[tokio::test]
    async fn failing_child_is_discarded() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .returning(|_| diff("x=1", "x=oops"));
        let evaluator = AssignmentEvaluator::default();
        let mut controller = EvolutionController::new(generator, evaluator);
        controller
            .initialize(Program::parse("seed", SEED).unwrap())
            .await
            .unwrap();

        let outcome = controller.step(1).await.unwrap();
        assert_eq!(outcome.kind(), "discarded");
        assert_eq!(controller.store().len(), 1);
    }

    #[tokio::test]
    async fn strict_policy_rejects_without_evaluating() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .returning(|_| format!("{}\n{}", diff("x=1", "x=2"), diff("zzz", "q")));
        let mut controller = EvolutionController::new(generator, AssignmentEvaluator::default())
            .with_policy(ApplyPolicy::Strict);
        controller
            .initialize(Program::parse("seed", SEED).unwrap())
            .await
            .unwrap();

        let outcome = controller.step(1).await.unwrap();
        assert_eq!(
            outcome,
            GenerationOutcome::Rejected {
                origin: "generation-1".to_string(),
                unresolved: 1,
            }
        );
        assert_eq!(*controller.evaluator.calls.lock().unwrap(), vec!["seed"]);
    }
}
