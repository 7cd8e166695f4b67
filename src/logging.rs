use std::env;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, fmt as layers, layer::SubscriberExt, util::SubscriberInitExt};

/// How the front end reaches the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEndMode {
    /// DAP on stdin/stdout, as spawned by an editor
    Stdio,
    /// DAP on a local TCP port, usually started by hand from a terminal
    Tcp(u16),
}

impl FrontEndMode {
    pub fn from_port(port: Option<u16>) -> Self {
        port.map_or(FrontEndMode::Stdio, FrontEndMode::Tcp)
    }

    /// Colored stderr only when nobody parses it; editors capture it in stdio mode
    fn colors_on_stderr(self) -> bool {
        matches!(self, FrontEndMode::Tcp(_))
    }
}

impl fmt::Display for FrontEndMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrontEndMode::Stdio => write!(f, "stdio"),
            FrontEndMode::Tcp(port) => write!(f, "tcp:127.0.0.1:{port}"),
        }
    }
}

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. "debug" or "ikpdb_dap::wire=trace"
    pub level: String,
    /// Log file; stderr when absent. Stdout may carry the front-end
    /// protocol and is never written to
    pub file_path: Option<PathBuf>,
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Read `RUST_LOG` and the `IKPDB_DAP_LOG_*` variables
    pub fn from_env() -> Self {
        let unique = env::var("IKPDB_DAP_LOG_UNIQUE").is_ok_and(|value| value == "true");
        let file_path = env::var("IKPDB_DAP_LOG_FILE").ok().map(|path| {
            let path = PathBuf::from(path);
            if unique {
                per_process(&path, std::process::id())
            } else {
                path
            }
        });

        Self {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            file_path,
            json_format: env::var("IKPDB_DAP_LOG_JSON").is_ok_and(|value| value == "true"),
        }
    }

    /// Command-line values win over the environment
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }

    /// Where records go, for the startup line
    pub fn destination(&self) -> String {
        let format = if self.json_format { "json" } else { "text" };
        match &self.file_path {
            Some(path) => format!("{} ({format})", path.display()),
            None => format!("stderr ({format})"),
        }
    }
}

/// `adapter.log` becomes `adapter.<pid>.log`, so editors that spawn one
/// adapter per session can share a configured path
fn per_process(path: &Path, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };
    let name = match path.extension() {
        Some(extension) => format!(
            "{}.{pid}.{}",
            stem.to_string_lossy(),
            extension.to_string_lossy()
        ),
        None => format!("{}.{pid}", stem.to_string_lossy()),
    };
    path.with_file_name(name)
}

/// Install the global subscriber and announce where the adapter is listening
pub fn init_logging(config: LogConfig, mode: FrontEndMode) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;

    let (writer, colors) = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(file), false)
        }
        None => (BoxMakeWriter::new(io::stderr), mode.colors_on_stderr()),
    };

    let layer = if config.json_format {
        layers::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .boxed()
    } else {
        layers::layer()
            .with_writer(writer)
            .with_ansi(colors)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .try_init()?;

    info!(
        front_end = %mode,
        filter = %config.level,
        "ikpdb-dap {} logging to {}",
        env!("CARGO_PKG_VERSION"),
        config.destination()
    );
    Ok(())
}

/// Log one front-end protocol message as a single structured event
#[macro_export]
macro_rules! log_dap_message {
    ($level:expr, $direction:expr, $command:expr, $data:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            command = $command,
            data = %$data,
            "DAP message"
        );
    };
}

/// Log one debuggee wire message as a single structured event
#[macro_export]
macro_rules! log_wire_message {
    ($level:expr, $direction:expr, $command:expr, $data:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            command = $command,
            data = %$data,
            "Debuggee message"
        );
    };
}
