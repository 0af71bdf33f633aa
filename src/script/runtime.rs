//! Interpreter selection and script materialization
//!
//! Recovery scripts always run through one fixed interpreter: PowerShell on
//! Windows, `sh` elsewhere. Inline sources are written to a temporary file
//! first so both source kinds launch the same way.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::process::Command;

use super::ScriptError;
use crate::model::ScriptSource;

/// Fixed interpreter used for every recovery script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
    /// Accepted extension of file sources (without the dot)
    pub extension: String,
}

impl Interpreter {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self {
                program: "powershell.exe".to_string(),
                args: ["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-File"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                extension: "ps1".to_string(),
            }
        } else {
            Self {
                program: "sh".to_string(),
                args: Vec::new(),
                extension: "sh".to_string(),
            }
        }
    }

    /// Command running `script` with `parameter` as its first positional argument
    pub fn command(&self, script: &Path, parameter: &str) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(script).arg(parameter);
        command
    }
}

/// Script file ready to run; inline sources are deleted once this is dropped
#[derive(Debug)]
pub enum MaterializedScript {
    Temporary(TempPath),
    Existing(PathBuf),
}

impl MaterializedScript {
    pub fn path(&self) -> &Path {
        match self {
            MaterializedScript::Temporary(path) => &**path,
            MaterializedScript::Existing(path) => path.as_path(),
        }
    }
}

/// Turn a script source into a runnable file, validating file sources
pub fn materialize(
    source: &ScriptSource,
    interpreter: &Interpreter,
    script_dir: Option<&Path>,
) -> Result<MaterializedScript, ScriptError> {
    match source {
        ScriptSource::Inline { content } => {
            let suffix = format!(".{}", interpreter.extension);
            let mut builder = tempfile::Builder::new();
            builder.prefix("winsentry-").suffix(&suffix);

            let mut file = match script_dir {
                Some(dir) => builder.tempfile_in(dir),
                None => builder.tempfile(),
            }
            .map_err(|e| ScriptError::Launch(format!("cannot create script file: {e}")))?;

            file.write_all(content.as_bytes())
                .and_then(|_| file.flush())
                .map_err(|e| ScriptError::Launch(format!("cannot write script file: {e}")))?;

            Ok(MaterializedScript::Temporary(file.into_temp_path()))
        }
        ScriptSource::File { path } => {
            if !path.is_file() {
                return Err(ScriptError::Launch(format!(
                    "script file {} does not exist",
                    path.display()
                )));
            }

            let extension_ok = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&interpreter.extension));
            if !extension_ok {
                return Err(ScriptError::Launch(format!(
                    "script file {} must have the .{} extension",
                    path.display(),
                    interpreter.extension
                )));
            }

            Ok(MaterializedScript::Existing(path.clone()))
        }
    }
}
