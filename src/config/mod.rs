//! Runtime configuration for agents and tool server processes.
//!
//! `AgentConfig` is plain in-code configuration with working defaults.
//! `ServerLaunchConfig` additionally derives `Deserialize` so embedders can
//! keep server definitions in their own config files; command, arguments and
//! workdir get `~` and `$VAR` expansion on the way in.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";
const DEFAULT_MODEL_ID: &str = "Qwen3-4B-GGUF";
const DEFAULT_MAX_STEPS: usize = 20;
const DEFAULT_MAX_CONSECUTIVE_REPEATS: usize = 4;
const DEFAULT_MAX_HISTORY_MESSAGES: usize = 40;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Options governing one agent instance. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// Model identifier sent with every completion request.
    pub model_id: String,
    /// Per-query bound on loop iterations.
    pub max_steps: usize,
    /// Consecutive same-tool requests tolerated before the loop is stopped.
    pub max_consecutive_repeats: usize,
    /// Ceiling on messages kept between queries (0 = unlimited).
    pub max_history_messages: usize,
    pub debug: bool,
    /// Selects the silent event sink instead of the terminal one.
    pub silent_mode: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            max_consecutive_repeats: DEFAULT_MAX_CONSECUTIVE_REPEATS,
            max_history_messages: DEFAULT_MAX_HISTORY_MESSAGES,
            debug: false,
            silent_mode: false,
        }
    }
}

impl AgentConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent_mode = true;
        self
    }
}

/// How to launch one external tool server process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawServerLaunch")]
pub struct ServerLaunchConfig {
    /// Path to the executable.
    pub command: PathBuf,
    /// Command line arguments.
    pub args: Vec<String>,
    /// Environment overrides merged into the parent environment.
    pub env: HashMap<String, String>,
    /// Working directory (optional).
    pub workdir: Option<PathBuf>,
    /// Per-request response deadline in seconds.
    pub timeout_secs: u64,
}

impl ServerLaunchConfig {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            workdir: None,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawServerLaunch {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    workdir: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl From<RawServerLaunch> for ServerLaunchConfig {
    fn from(raw: RawServerLaunch) -> Self {
        let expand = |s: &str| -> String {
            shellexpand::full(s)
                .map(|cow| cow.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };

        Self {
            command: PathBuf::from(expand(&raw.command)),
            args: raw.args.iter().map(|arg| expand(arg)).collect(),
            env: raw.env,
            workdir: raw.workdir.map(|dir| PathBuf::from(expand(&dir))),
            timeout_secs: raw.timeout_secs,
        }
    }
}
