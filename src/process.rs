//! Blocking external command runner shared by the gpg and git integrations

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;

/// Captured result of an external command
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

/// Run `command`, feeding `input` on stdin, and wait for it to exit.
///
/// Spawn failures (missing binary, permissions) are returned as `Err`; a
/// non-zero exit is reported through [`ProcessOutput::success`].
pub fn run(command: &mut Command, input: Option<&str>) -> io::Result<ProcessOutput> {
    debug!("run(command): {}", describe(command));

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // stdin is dropped at the end of this block so the child sees EOF
    if let Some(mut stdin) = child.stdin.take() {
        if let Some(data) = input {
            // a child that exits early closes its end; its status tells the story
            match stdin.write_all(data.as_bytes()) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
        }
    }

    let output = child.wait_with_output()?;
    let result = ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        success: output.status.success(),
        code: output.status.code(),
    };

    if !result.success {
        debug!(
            "run(command): exit {:?}: {}",
            result.code,
            result.stderr.trim()
        );
    }

    Ok(result)
}

/// First of `binaries` found on `PATH`
pub fn which(binaries: &[&str]) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    binaries.iter().find_map(|binary| {
        env::split_paths(&paths)
            .map(|dir| dir.join(binary))
            .find(|candidate| is_executable(candidate))
    })
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.is_file() || path.with_extension("exe").is_file()
    }
}

/// Command line for logging, with passphrase arguments masked
fn describe(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    let mut mask_next = false;

    for arg in command.get_args() {
        let arg = arg.to_string_lossy();
        if mask_next {
            parts.push("********".to_string());
            mask_next = false;
        } else {
            mask_next = arg == "--passphrase";
            parts.push(arg.into_owned());
        }
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_masks_passphrase() {
        let mut command = Command::new("gpg");
        command.args(["--batch", "--passphrase", "hunter2", "-d", "-"]);

        let line = describe(&command);
        assert_eq!(line, "gpg --batch --passphrase ******** -d -");
        assert!(!line.contains("hunter2"));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let mut command = Command::new("passhold-definitely-not-installed");
        let err = run(&mut command, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_which_unknown_binary() {
        assert!(which(&["passhold-definitely-not-installed"]).is_none());
    }
}
