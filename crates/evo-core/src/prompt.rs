//! Prompt assembly
//!
//! Builds the text sent to the generator: a system prompt, the inspirations
//! with their scores, the parent program with its scores, and instructions
//! for answering with SEARCH/REPLACE blocks.

use crate::population::PopulationEntry;
use evo_program::{DIVIDER_MARKER, REPLACE_MARKER, SEARCH_MARKER};
use std::fmt::Write;

/// Default system prompt for code evolution
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
Act as an expert software developer. Your task is to iteratively improve the provided codebase.
You will be given a program to improve, along with examples of previously successful programs.
Propose a single, targeted modification to the \"Current program\". Your goal is to improve its performance based on the problem description.
Higher scores are always better (e.g. 10 is better than 0, which is better than -10).
Think step-by-step about what could be improved.
Your output must be a diff in the specified SEARCH/REPLACE format.
";

/// Builds generator prompts
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

impl PromptBuilder {
    /// Create builder with a system prompt
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// System prompt
    #[inline]
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Build the prompt for mutating `current`
    #[must_use]
    pub fn build(&self, current: &PopulationEntry, inspirations: &[&PopulationEntry]) -> String {
        let mut prompt = String::with_capacity(self.system_prompt.len() + 1024);
        prompt.push_str(&self.system_prompt);
        prompt.push_str("\n\n");

        if !inspirations.is_empty() {
            prompt.push_str("- Prior programs and scores\n");
            prompt.push_str("Previously we found that the following programs performed well:\n");
            for entry in inspirations {
                push_program(&mut prompt, entry);
            }
            prompt.push('\n');
        }

        prompt.push_str("- Current program and score\n");
        prompt.push_str("Here is the current program to improve (scores shown below):\n");
        push_program(&mut prompt, current);

        prompt.push_str(
            "Task: Suggest a new idea to improve the code that is inspired by your expert knowledge.\n",
        );
        prompt.push_str("Describe each change with a SEARCH/REPLACE block. For example:\n\n");
        let _ = writeln!(
            prompt,
            "{SEARCH_MARKER}\n# Original code block to be found\n{DIVIDER_MARKER}\n# and replaced\n# New code block to replace the original\n{REPLACE_MARKER}"
        );
        prompt
    }
}

fn push_program(prompt: &mut String, entry: &PopulationEntry) {
    let _ = write!(
        prompt,
        "Code:\n```\n{}\n```\nScore: {}\n\n",
        entry.program(),
        entry.scores()
    );
}
