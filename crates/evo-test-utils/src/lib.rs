//! Testing utilities for the evolution workspace
//!
//! Shared fixtures, scripted generators and in-process evaluators.

#![allow(missing_docs)]

use evo_core::Generator;
use evo_program::{Program, DIVIDER_MARKER, REPLACE_MARKER, SEARCH_MARKER};
use evo_sandbox::{EvaluationError, EvaluationResult, ProgramEvaluator, Scores};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Two evolve segments between three skeleton fragments
pub const SEED_SOURCE: &str = "a\n# EVOLVE-BLOCK-START\nx=1\n# EVOLVE-BLOCK-END\nb\n# EVOLVE-BLOCK-START\ny=2\n# EVOLVE-BLOCK-END\nc";

pub fn seed_program() -> Program {
    Program::parse("seed", SEED_SOURCE).unwrap()
}

/// One SEARCH/REPLACE block
pub fn diff_block(search: &str, replace: &str) -> String {
    format!("{SEARCH_MARKER}\n{search}\n{DIVIDER_MARKER}\n{replace}\n{REPLACE_MARKER}")
}

/// Generator replaying canned responses in order, then empty strings
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> String {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses.lock().unwrap().pop_front().unwrap_or_default()
    }
}

/// In-process evaluator backed by a closure
pub struct FnEvaluator<F> {
    score: F,
    evaluated: Mutex<Vec<String>>,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&Program) -> EvaluationResult + Send + Sync,
{
    pub fn new(score: F) -> Self {
        Self {
            score,
            evaluated: Mutex::new(Vec::new()),
        }
    }

    /// Origins of evaluated programs, in order
    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl<F> ProgramEvaluator for FnEvaluator<F>
where
    F: Fn(&Program) -> EvaluationResult + Send + Sync,
{
    async fn evaluate(&self, program: &Program) -> EvaluationResult {
        self.evaluated
            .lock()
            .unwrap()
            .push(program.origin().to_string());
        (self.score)(program)
    }
}

/// Scores `average_score` as the integer assigned to `x` in segment 0
pub fn assignment_evaluator() -> FnEvaluator<impl Fn(&Program) -> EvaluationResult + Send + Sync> {
    FnEvaluator::new(|program: &Program| {
        let value = program
            .segment(0)
            .and_then(|s| s.trim().strip_prefix("x="))
            .and_then(|v| v.trim().parse::<f64>().ok())
            .ok_or_else(|| EvaluationError::Exception("x is not a number".to_string()))?;
        Ok(Scores::new().with("average_score", value))
    })
}
