//! Worker runtimes
//!
//! A [`WorkerRuntime`] turns a candidate program into a runnable worker: it
//! writes whatever files the worker needs into a private workspace directory
//! and returns the command that loads the candidate and runs the evaluation
//! routine there. The evaluator owns everything else (isolation, timeout,
//! result collection).

use crate::error::SandboxError;
use evo_program::Program;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

/// Environment variable holding the staged candidate path
pub const CANDIDATE_ENV: &str = "EVOLVE_CANDIDATE";

/// Environment variable holding the worker workspace path
pub const WORKSPACE_ENV: &str = "EVOLVE_WORKSPACE";

const BOOTSTRAP: &str = include_str!("bootstrap.py");
const BOOTSTRAP_FILE: &str = "_evolve_worker.py";

/// Worker invocation produced by staging
///
/// Environment entries here are applied after the host environment has been
/// cleared, so they always reach the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerCommand {
    program: OsString,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    /// Create command for an executable
    #[must_use]
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            ..Self::default()
        }
    }

    /// Append an argument
    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Set a worker environment variable
    #[inline]
    #[must_use]
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Executable
    #[inline]
    #[must_use]
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Arguments
    #[inline]
    #[must_use]
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Worker environment value for `key`
    #[must_use]
    pub fn get_env(&self, key: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    /// Build a process command with a cleared environment
    ///
    /// Only `inherited` host variables and this command's own variables are
    /// visible to the worker.
    pub(crate) fn into_command<I, K, V>(self, inherited: I) -> Command
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .envs(inherited)
            .envs(self.env);
        command
    }
}

/// Loads a candidate and its evaluation routine inside a worker process
pub trait WorkerRuntime: Send + Sync + std::fmt::Debug {
    /// Runtime name for logs
    fn name(&self) -> &str;

    /// Stage the candidate into `workspace` and build the worker command
    ///
    /// # Errors
    /// Returns error if staging files fails
    fn stage(&self, workspace: &Path, program: &Program) -> Result<WorkerCommand, SandboxError>;
}

/// Python worker: imports the candidate as module `candidate` and calls a
/// zero-argument routine of the evaluation script
#[derive(Debug, Clone)]
pub struct PythonRuntime {
    interpreter: PathBuf,
    eval_script: PathBuf,
    routine: String,
}

impl PythonRuntime {
    /// Create runtime using `python3` and routine `evaluate`
    #[must_use]
    pub fn new(eval_script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
            eval_script: eval_script.into(),
            routine: "evaluate".to_string(),
        }
    }

    /// With interpreter
    #[inline]
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// With evaluation routine name
    #[inline]
    #[must_use]
    pub fn with_routine(mut self, routine: impl Into<String>) -> Self {
        self.routine = routine.into();
        self
    }
}

impl WorkerRuntime for PythonRuntime {
    fn name(&self) -> &str {
        "python"
    }

    fn stage(&self, workspace: &Path, program: &Program) -> Result<WorkerCommand, SandboxError> {
        let eval_script = std::fs::canonicalize(&self.eval_script).map_err(|source| {
            SandboxError::Stage {
                what: format!("evaluation script {}", self.eval_script.display()),
                source,
            }
        })?;
        let candidate = write_file(workspace, "candidate.py", program.text())?;
        let bootstrap = write_file(workspace, BOOTSTRAP_FILE, BOOTSTRAP)?;

        Ok(WorkerCommand::new(&self.interpreter)
            .arg(bootstrap)
            .arg(&candidate)
            .arg(eval_script)
            .arg(&self.routine)
            .env(CANDIDATE_ENV, &candidate))
    }
}

/// Generic worker: runs an evaluation command that reads the candidate from
/// `$EVOLVE_CANDIDATE` and prints a JSON scores object
#[derive(Debug, Clone)]
pub struct CommandRuntime {
    program: PathBuf,
    args: Vec<String>,
    candidate_file: String,
}

impl CommandRuntime {
    /// Create runtime for an executable
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            candidate_file: "candidate.txt".to_string(),
        }
    }

    /// With command arguments
    #[inline]
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// With file name for the staged candidate
    #[inline]
    #[must_use]
    pub fn with_candidate_file(mut self, name: impl Into<String>) -> Self {
        self.candidate_file = name.into();
        self
    }
}

impl WorkerRuntime for CommandRuntime {
    fn name(&self) -> &str {
        "command"
    }

    fn stage(&self, workspace: &Path, program: &Program) -> Result<WorkerCommand, SandboxError> {
        let candidate = write_file(workspace, &self.candidate_file, program.text())?;

        Ok(WorkerCommand::new(&self.program)
            .args(&self.args)
            .env(CANDIDATE_ENV, &candidate))
    }
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf, SandboxError> {
    let path = dir.join(name);
    std::fs::write(&path, contents).map_err(|source| SandboxError::Stage {
        what: name.to_string(),
        source,
    })?;
    Ok(path)
}

/// Serializable runtime selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuntimeSpec {
    /// [`PythonRuntime`]
    Python {
        #[serde(default = "default_interpreter")]
        interpreter: PathBuf,
        #[serde(default = "default_routine")]
        routine: String,
    },
    /// [`CommandRuntime`]; the evaluation script path is appended to `args`
    Command {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_candidate_file")]
        candidate_file: String,
    },
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("python3")
}

fn default_routine() -> String {
    "evaluate".to_string()
}

fn default_candidate_file() -> String {
    "candidate.txt".to_string()
}

impl Default for RuntimeSpec {
    fn default() -> Self {
        Self::Python {
            interpreter: default_interpreter(),
            routine: default_routine(),
        }
    }
}

impl RuntimeSpec {
    /// Build the runtime for an evaluation script
    #[must_use]
    pub fn build(&self, eval_script: &Path) -> Arc<dyn WorkerRuntime> {
        match self {
            Self::Python {
                interpreter,
                routine,
            } => Arc::new(
                PythonRuntime::new(eval_script)
                    .with_interpreter(interpreter)
                    .with_routine(routine),
            ),
            Self::Command {
                program,
                args,
                candidate_file,
            } => {
                let mut args = args.clone();
                args.push(eval_script.display().to_string());
                Arc::new(
                    CommandRuntime::new(program)
                        .with_args(args)
                        .with_candidate_file(candidate_file),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Program {
        Program::parse("t", "# EVOLVE-BLOCK-START\nx = 1\n# EVOLVE-BLOCK-END\n").unwrap()
    }

    #[test]
    fn python_stage_writes_candidate_and_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("eval.py");
        std::fs::write(&script, "def evaluate():\n    return {}\n").unwrap();
        let workspace = tempfile::tempdir().unwrap();

        let runtime = PythonRuntime::new(&script);
        let command = runtime.stage(workspace.path(), &program()).unwrap();

        let staged = std::fs::read_to_string(workspace.path().join("candidate.py")).unwrap();
        assert_eq!(staged, program().text());
        assert!(workspace.path().join(BOOTSTRAP_FILE).exists());
        assert_eq!(command.program(), "python3");
        assert_eq!(command.get_args().len(), 4);
        assert_eq!(
            command.get_env(CANDIDATE_ENV),
            Some(workspace.path().join("candidate.py").as_os_str())
        );
    }

    #[test]
    fn python_stage_fails_for_missing_script() {
        let workspace = tempfile::tempdir().unwrap();
        let runtime = PythonRuntime::new("/nonexistent/eval.py");
        let result = runtime.stage(workspace.path(), &program());
        assert!(matches!(result, Err(SandboxError::Stage { .. })));
    }

    #[test]
    fn command_stage_uses_candidate_file_name() {
        let workspace = tempfile::tempdir().unwrap();
        let runtime = CommandRuntime::new("sh")
            .with_args(["score.sh"])
            .with_candidate_file("candidate.py");
        let command = runtime.stage(workspace.path(), &program()).unwrap();

        assert!(workspace.path().join("candidate.py").exists());
        assert_eq!(command.get_args(), &[OsString::from("score.sh")]);
    }

    #[test]
    fn into_command_applies_worker_env_after_clearing() {
        let command = WorkerCommand::new("sh")
            .arg("-c")
            .env(CANDIDATE_ENV, "/tmp/c.txt")
            .into_command([("PATH", "/usr/bin")]);
        let envs: Vec<_> = command.as_std().get_envs().collect();
        assert!(envs.contains(&(OsStr::new(CANDIDATE_ENV), Some(OsStr::new("/tmp/c.txt")))));
        assert!(envs.contains(&(OsStr::new("PATH"), Some(OsStr::new("/usr/bin")))));
    }

    #[test]
    fn runtime_spec_defaults_to_python() {
        let spec: RuntimeSpec = serde_json::from_str(r#"{"kind": "python"}"#).unwrap();
        assert_eq!(spec, RuntimeSpec::default());
        assert_eq!(spec.build(Path::new("eval.py")).name(), "python");
    }

    #[test]
    fn runtime_spec_command_appends_script() {
        let spec: RuntimeSpec =
            serde_json::from_str(r#"{"kind": "command", "program": "sh"}"#).unwrap();
        let runtime = spec.build(Path::new("/tmp/score.sh"));
        assert_eq!(runtime.name(), "command");
    }
}
