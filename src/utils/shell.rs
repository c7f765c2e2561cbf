use std::env;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use nix::errno::Errno;

use crate::constants::MAX_ERR_OUTPUT;
use crate::errors::{CmdFailure, SupError};

/// Options for a single command execution
#[derive(Debug, Clone)]
pub struct ExecOpts {
    /// Run the joined argv with `sh -c`
    pub shell: bool,
    /// Extra variables merged over the inherited environment
    pub env: Vec<(String, String)>,
    /// Do not log output lines as they arrive
    pub quiet: bool,
    /// Keep only the last `MAX_ERR_OUTPUT` characters of failed output
    pub truncate: bool,
    pub cwd: Option<PathBuf>,
}

impl Default for ExecOpts {
    fn default() -> Self {
        Self {
            shell: false,
            env: Vec::new(),
            quiet: false,
            truncate: true,
            cwd: None,
        }
    }
}

impl ExecOpts {
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    pub fn shell() -> Self {
        Self {
            shell: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub code: i32,
    /// Merged stdout and stderr, in arrival order
    pub output: String,
}

/// Runs external programs. Everything sup-rs does to a system goes through here.
pub trait Executor {
    fn exec_with(&self, argv: &[&str], opts: &ExecOpts) -> Result<CmdOutput, SupError>;

    /// Runs with the terminal attached, for programs that prompt the user
    fn exec_interactive(&self, argv: &[&str]) -> Result<(), SupError>;

    fn exec(&self, argv: &[&str]) -> Result<CmdOutput, SupError> {
        self.exec_with(argv, &ExecOpts::default())
    }

    fn exec_quiet(&self, argv: &[&str]) -> Result<CmdOutput, SupError> {
        self.exec_with(argv, &ExecOpts::quiet())
    }
}

/// The real executor
pub struct Shell;

impl Executor for Shell {
    fn exec_with(&self, argv: &[&str], opts: &ExecOpts) -> Result<CmdOutput, SupError> {
        exec(argv, opts)
    }

    fn exec_interactive(&self, argv: &[&str]) -> Result<(), SupError> {
        let line = argv.join(" ");
        tracing::info!("exec (interactive): {line}");

        let mut cmd = command(argv, &ExecOpts::default())?;
        let status = cmd
            .status()
            .map_err(|err| SupError::CmdSpawn {
                error: err,
                context: line.clone(),
            })?;

        match exit_code(status) {
            0 => Ok(()),
            code => Err(failure(line, code, String::new(), false)),
        }
    }
}

pub fn as_strs(v: &[String]) -> Vec<&str> {
    v.iter().map(String::as_str).collect()
}

fn command(argv: &[&str], opts: &ExecOpts) -> Result<Command, SupError> {
    let mut cmd = if opts.shell {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(argv.join(" "));
        cmd
    } else {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SupError::SupRsBug("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd
    };

    for (key, value) in &opts.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &opts.cwd {
        cmd.current_dir(dir);
    }

    Ok(cmd)
}

/// Runs `argv` with stdout and stderr merged into one pipe.
/// The pipe is drained line by line until EOF before waiting on the child,
/// so chatty programs never block on a full pipe.
pub fn exec(argv: &[&str], opts: &ExecOpts) -> Result<CmdOutput, SupError> {
    let line = argv.join(" ");
    tracing::info!("exec: {line}");

    let spawn_err = |err: std::io::Error| SupError::CmdSpawn {
        error: err,
        context: line.clone(),
    };

    let (reader, writer) = nix::unistd::pipe()
        .map_err(|errno| spawn_err(std::io::Error::from(errno)))?;
    let writer_err = writer.try_clone().map_err(spawn_err)?;

    let mut cmd = command(argv, opts)?;
    cmd.stdout(Stdio::from(writer))
        .stderr(Stdio::from(writer_err));

    let mut child = cmd.spawn().map_err(spawn_err)?;
    // Close our copies of the write end, or the read below never sees EOF
    drop(cmd);

    let mut reader = BufReader::new(File::from(reader));
    let mut captured = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).map_err(spawn_err)?;
        if n == 0 {
            break;
        }

        if !opts.quiet {
            let text = String::from_utf8_lossy(&buf);
            let text = text.trim_end();
            if !text.is_empty() {
                tracing::info!("{text}");
            }
        }

        captured.extend_from_slice(&buf);
    }

    let status = child.wait().map_err(spawn_err)?;
    let output = String::from_utf8_lossy(&captured).into_owned();

    match exit_code(status) {
        0 => Ok(CmdOutput { code: 0, output }),
        code => Err(failure(line, code, output, opts.truncate)),
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

fn failure(command: String, code: i32, output: String, truncate: bool) -> SupError {
    let description = Errno::from_raw(code).desc().to_string();
    tracing::error!("{command}: exit status {code} ({description})");

    let output = if truncate {
        tail(&output, MAX_ERR_OUTPUT).to_string()
    } else {
        output
    };

    SupError::CmdFailed(CmdFailure {
        command,
        code,
        description,
        output,
    })
}

/// Last `max` characters of `s`, cut on a char boundary
pub fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }

    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

pub fn in_path(program: &str) -> bool {
    if let Ok(path) = env::var("PATH") {
        for p in path.split(':') {
            let p_str = format!("{}/{}", p, program);
            if fs::metadata(p_str).is_ok() {
                return true;
            }
        }
    }

    false
}
