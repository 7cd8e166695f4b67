//! Launch and attach configuration
//!
//! Turns front-end request arguments into everything a session needs:
//! where the debuggee listens, how path translation is rooted and, for
//! launch, the interpreter command line.

use std::path::{Path, PathBuf};

use crate::dap::protocol::{AttachArguments, LaunchArguments, SourceRoots};
use crate::io::ProcessSpec;
use crate::wire::Endpoint;
use crate::wire::client::{DEFAULT_HOST, DEFAULT_PORT};

/// Module run by the interpreter
pub const DEBUGGEE_MODULE: &str = "ikp3db";

/// Selects the protocol this adapter speaks
pub const PROTOCOL_FLAG: &str = "--ikpdb-protocol=vscode";

pub const DEFAULT_PYTHON: &str = "python3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    pub source_roots: Vec<PathBuf>,
    /// Directory relative paths are resolved against
    pub working_dir: PathBuf,
    pub stop_on_entry: bool,
    /// Present for launch, absent for attach
    pub process: Option<ProcessSpec>,
}

impl SessionConfig {
    pub fn for_launch(args: LaunchArguments, adapter_dir: &Path) -> Self {
        let working_dir = args
            .cwd
            .map(|cwd| adapter_dir.join(cwd))
            .unwrap_or_else(|| adapter_dir.to_path_buf());

        let mut command_args = vec![
            "-m".to_string(),
            DEBUGGEE_MODULE.to_string(),
            PROTOCOL_FLAG.to_string(),
        ];
        command_args.extend(args.ikp3db_args);
        command_args.push(args.program);
        command_args.extend(args.args);

        let process = ProcessSpec {
            program: args.python_path.unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
            args: command_args,
            working_dir: Some(working_dir.clone()),
        };

        Self {
            endpoint: endpoint(args.host, args.port),
            source_roots: source_roots(args.source_root, &working_dir),
            working_dir,
            stop_on_entry: args.stop_on_entry,
            process: Some(process),
        }
    }

    pub fn for_attach(args: AttachArguments, adapter_dir: &Path) -> Self {
        Self {
            endpoint: endpoint(args.host, args.port),
            source_roots: source_roots(args.source_root, adapter_dir),
            working_dir: adapter_dir.to_path_buf(),
            stop_on_entry: args.stop_on_entry,
            process: None,
        }
    }
}

fn endpoint(host: Option<String>, port: Option<u16>) -> Endpoint {
    Endpoint {
        host: host
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: port.filter(|&port| port != 0).unwrap_or(DEFAULT_PORT),
    }
}

fn source_roots(configured: Option<SourceRoots>, default_root: &Path) -> Vec<PathBuf> {
    configured
        .map(|roots| roots.into_vec())
        .filter(|roots| !roots.is_empty())
        .unwrap_or_else(|| vec![default_root.to_path_buf()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_defaults() {
        let config = SessionConfig::for_launch(
            LaunchArguments {
                program: "main.py".to_string(),
                ..Default::default()
            },
            Path::new("/work"),
        );

        assert_eq!(config.endpoint.to_string(), "127.0.0.1:15470");
        assert_eq!(config.source_roots, vec![PathBuf::from("/work")]);
        assert!(!config.stop_on_entry);

        let process = config.process.unwrap();
        assert_eq!(process.program, "python3");
        assert_eq!(process.args, vec!["-m", "ikp3db", "--ikpdb-protocol=vscode", "main.py"]);
        assert_eq!(process.working_dir, Some(PathBuf::from("/work")));
    }

    #[test]
    fn test_launch_command_line_order() {
        let config = SessionConfig::for_launch(
            LaunchArguments {
                program: "app.py".to_string(),
                args: vec!["--verbose".to_string(), "input.txt".to_string()],
                cwd: Some(PathBuf::from("proj")),
                python_path: Some("/opt/py/bin/python".to_string()),
                ikp3db_args: vec!["--ikpdb-port=16000".to_string()],
                source_root: None,
                host: Some("10.0.0.2".to_string()),
                port: Some(16000),
                stop_on_entry: true,
            },
            Path::new("/work"),
        );

        let process = config.process.unwrap();
        assert_eq!(process.program, "/opt/py/bin/python");
        assert_eq!(
            process.args,
            vec![
                "-m",
                "ikp3db",
                "--ikpdb-protocol=vscode",
                "--ikpdb-port=16000",
                "app.py",
                "--verbose",
                "input.txt"
            ]
        );
        assert_eq!(process.working_dir, Some(PathBuf::from("/work/proj")));
        // Source root defaults to the launch cwd
        assert_eq!(config.source_roots, vec![PathBuf::from("/work/proj")]);
        assert_eq!(config.endpoint.to_string(), "10.0.0.2:16000");
        assert!(config.stop_on_entry);
    }

    #[test]
    fn test_attach() {
        let config = SessionConfig::for_attach(
            AttachArguments {
                source_root: Some(SourceRoots::Many(vec!["/a".into(), "/b".into()])),
                port: Some(4711),
                ..Default::default()
            },
            Path::new("/work"),
        );
        assert!(config.process.is_none());
        assert_eq!(config.endpoint.to_string(), "127.0.0.1:4711");
        assert_eq!(config.source_roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);

        let defaulted = SessionConfig::for_attach(AttachArguments::default(), Path::new("/work"));
        assert_eq!(defaulted.source_roots, vec![PathBuf::from("/work")]);
        assert_eq!(defaulted.endpoint.port, 15470);
    }
}
