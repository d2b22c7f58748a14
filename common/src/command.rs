//! Thin async wrapper around the external tools (`ip`, `wg`) used to configure the host.

use std::process::Stdio;

use thiserror::Error as ThisError;
use tokio::{io::AsyncWriteExt as _, process::Command};
use tracing::debug;

/// Failure of an external command.
#[derive(Debug, ThisError)]
pub enum CommandError {
    #[error("failed to spawn `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Run `program` with `args`, optionally feeding `stdin`, and return its stdout.
///
/// # Errors
///
/// Returns an error if the program cannot be spawned or exits unsuccessfully.
pub async fn run(program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<String, CommandError> {
    let command_line = format!("{program} {}", args.join(" "));
    debug!(command = %command_line, "Running command");

    let spawn_err = |source| CommandError::Spawn {
        program: program.to_string(),
        source,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_err)?;

    if let Some(input) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        pipe.write_all(input).await.map_err(spawn_err)?;
        // Closing stdin signals EOF to the child.
        drop(pipe);
    }

    let output = child.wait_with_output().await.map_err(spawn_err)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(CommandError::Failed {
            command: command_line,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_feeds_stdin() {
        let out = run("cat", &[], Some(b"peer table")).await.unwrap();
        assert_eq!(out, "peer table");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let err = run("sh", &["-c", "echo nope >&2; exit 3"], None)
            .await
            .unwrap_err();
        match err {
            CommandError::Failed { stderr, .. } => assert_eq!(stderr, "nope"),
            other @ CommandError::Spawn { .. } => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run("definitely-not-a-real-binary-tunlease", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }), "{err}");
    }
}
