//! Configuration for topomap.
//!
//! Settings are layered: built-in defaults, then `topomap.toml`, then
//! environment variables (a `.env` file is honoured), then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [worker]
//! program = "python3"
//! args = ["create_map/create_map.py"]
//! # script_folder = "create_map"
//! max_concurrent = 2
//!
//! [progress]
//! wait_timeout_secs = 30
//! coalesce_window_ms = 100
//! delivery_delay_ms = 50
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! dev_mode = false
//!
//! [storage]
//! temp_folder = "tmp"
//! # dtk50_folder = "/data/dtk50"
//! # dtk25_folder = "/data/dtk25"
//!
//! [logging]
//! filter = "topomap=info,tower_http=info"
//! json = false
//! # directory = "logs"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::progress::TrackerConfig;
use crate::worker::ProcessRunner;

pub const DEFAULT_CONFIG_FILE: &str = "topomap.toml";

/// How the worker process is launched and how many may run at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Worker binary
    #[serde(default = "default_program")]
    pub program: String,
    /// Fixed leading arguments, before the job flags
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Folder holding `create_map.py` and its `.venv`; overrides `program`/`args`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_folder: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Concurrency limiter capacity
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["create_map/create_map.py".to_string()]
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            script_folder: None,
            working_dir: None,
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl WorkerSection {
    /// Program and leading arguments, resolving `script_folder` if set.
    pub fn command(&self) -> (String, Vec<String>) {
        match &self.script_folder {
            Some(folder) => {
                let python = venv_python(&folder.join(".venv"));
                let script = folder.join("create_map.py");
                (
                    python.to_string_lossy().into_owned(),
                    vec![script.to_string_lossy().into_owned()],
                )
            }
            None => (self.program.clone(), self.args.clone()),
        }
    }

    pub fn runner(&self) -> ProcessRunner {
        let (program, args) = self.command();
        let runner = ProcessRunner::new(program, args);
        match &self.working_dir {
            Some(dir) => runner.with_working_dir(dir),
            None => runner,
        }
    }
}

#[cfg(windows)]
fn venv_python(venv: &Path) -> PathBuf {
    venv.join("Scripts").join("python.exe")
}

#[cfg(not(windows))]
fn venv_python(venv: &Path) -> PathBuf {
    venv.join("bin").join("python")
}

/// Long-poll timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSection {
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
    #[serde(default = "default_delivery_delay_ms")]
    pub delivery_delay_ms: u64,
}

fn default_wait_timeout_secs() -> u64 {
    30
}

fn default_coalesce_window_ms() -> u64 {
    100
}

fn default_delivery_delay_ms() -> u64 {
    50
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout_secs(),
            coalesce_window_ms: default_coalesce_window_ms(),
            delivery_delay_ms: default_delivery_delay_ms(),
        }
    }
}

impl ProgressSection {
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            coalesce_window: Duration::from_millis(self.coalesce_window_ms),
            delivery_delay: Duration::from_millis(self.delivery_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a separately served frontend
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

/// Where artifacts are written and raster data is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_temp_folder")]
    pub temp_folder: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtk50_folder: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtk25_folder: Option<PathBuf>,
}

fn default_temp_folder() -> PathBuf {
    PathBuf::from("tmp")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            temp_folder: default_temp_folder(),
            dtk50_folder: None,
            dtk25_folder: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
    /// Daily rolling log files are written here when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_log_filter() -> String {
    "topomap=info,tower_http=info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
            directory: None,
        }
    }
}

/// Root of `topomap.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopomapToml {
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub progress: ProgressSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TopomapToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse topomap.toml")
    }

    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize topomap.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(cmd) = get("TOPOMAP_WORKER_CMD") {
            let mut parts = cmd.split_whitespace().map(str::to_string);
            if let Some(program) = parts.next() {
                self.worker.program = program;
                self.worker.args = parts.collect();
                self.worker.script_folder = None;
            }
        }
        if let Some(folder) = get("CREATE_MAP_PY_FOLDER") {
            self.worker.script_folder = Some(PathBuf::from(folder));
        }
        if let Some(n) = get("TOPOMAP_MAX_CONCURRENT") {
            self.worker.max_concurrent = n
                .trim()
                .parse()
                .with_context(|| format!("Invalid TOPOMAP_MAX_CONCURRENT '{}'", n))?;
        }
        if let Some(folder) = get("TEMP_FOLDER") {
            self.storage.temp_folder = PathBuf::from(folder);
        }
        if let Some(folder) = get("DTK50_FOLDER") {
            self.storage.dtk50_folder = Some(PathBuf::from(folder));
        }
        if let Some(folder) = get("DTK25_FOLDER") {
            self.storage.dtk25_folder = Some(PathBuf::from(folder));
        }
        if let Some(port) = get("TOPOMAP_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid TOPOMAP_PORT '{}'", port))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.worker.max_concurrent == 0 {
            warnings.push("worker.max_concurrent is 0; at least one job will still run".to_string());
        }
        if self.worker.script_folder.is_none() && self.worker.program.trim().is_empty() {
            warnings.push("worker.program is empty".to_string());
        }
        if let Some(folder) = &self.worker.script_folder {
            let script = folder.join("create_map.py");
            if !script.exists() {
                warnings.push(format!("Worker script not found: {}", script.display()));
            }
        }
        if self.progress.wait_timeout_secs == 0 {
            warnings.push("progress.wait_timeout_secs is 0; every poll will time out".to_string());
        }
        if self.progress.coalesce_window_ms < self.progress.delivery_delay_ms {
            warnings.push(format!(
                "progress.coalesce_window_ms ({}) is shorter than delivery_delay_ms ({}); updates will not be coalesced",
                self.progress.coalesce_window_ms, self.progress.delivery_delay_ms
            ));
        }
        for (name, folder) in [
            ("dtk50_folder", &self.storage.dtk50_folder),
            ("dtk25_folder", &self.storage.dtk25_folder),
        ] {
            if let Some(folder) = folder
                && !folder.is_dir()
            {
                warnings.push(format!(
                    "storage.{} does not exist: {}",
                    name,
                    folder.display()
                ));
            }
        }

        warnings
    }
}

/// Fully resolved configuration.
///
/// It merges settings from:
/// 1. topomap.toml file
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path the file layer was read from (it may not exist)
    pub path: PathBuf,
    pub toml: TopomapToml,
    pub verbose: bool,
}

impl AppConfig {
    /// Load the file (or defaults) and apply environment overrides.
    pub fn load(path: Option<&Path>, verbose: bool) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut toml = TopomapToml::load_or_default(&path)?;
        toml.apply_env()?;
        Ok(Self {
            path,
            toml,
            verbose,
        })
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        self.toml.progress.tracker_config()
    }

    pub fn storage(&self) -> &StorageSection {
        &self.toml.storage
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
