//! The `custom` provider: stdout of a shell command.
//!
//! One mandatory arg, `cmd`, run as `/bin/sh -c <cmd>`. Stdout is captured
//! and trailing whitespace trimmed; the result is the singleton set
//! `{out -> out}`. A non-zero exit is an error naming the command. There
//! is no retry.

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{required_arg, with_cancel, Results};
use crate::config::SourceEntry;
use crate::core::VbumpError;

pub async fn get(
    source: &SourceEntry,
    cancel: &CancellationToken,
) -> Result<Results, VbumpError> {
    let cmd = required_arg(source, "cmd")?.to_string();
    let output = with_cancel(cancel, "custom command", async {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(&cmd)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| VbumpError::Upstream(format!("failed running {cmd}: {e}")))
    })
    .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VbumpError::Upstream(format!(
            "failed running {cmd}: exit status {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }
    let out = String::from_utf8_lossy(&output.stdout)
        .trim_end()
        .to_string();
    let mut results = Results::default();
    results.ver_map.insert(out.clone(), out);
    Ok(results)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn source_with_cmd(cmd: &str) -> SourceEntry {
        SourceEntry {
            name: "cmd".to_string(),
            source_type: "custom".to_string(),
            args: [("cmd".to_string(), cmd.to_string())].into_iter().collect(),
            ..SourceEntry::default()
        }
    }

    #[tokio::test]
    async fn captures_trimmed_stdout() {
        let cancel = CancellationToken::new();
        let results = get(&source_with_cmd("echo 1.2.3"), &cancel).await.unwrap();
        assert_eq!(results.ver_map["1.2.3"], "1.2.3");
    }

    #[tokio::test]
    async fn nonzero_exit_names_the_command() {
        let cancel = CancellationToken::new();
        let err = get(&source_with_cmd("exit 7"), &cancel).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit 7"), "{msg}");
        assert!(msg.contains("exit status 7"), "{msg}");
    }

    #[tokio::test]
    async fn missing_cmd_arg_fails() {
        let cancel = CancellationToken::new();
        let source = SourceEntry {
            name: "cmd".to_string(),
            source_type: "custom".to_string(),
            ..SourceEntry::default()
        };
        let err = get(&source, &cancel).await.unwrap_err();
        assert!(err.to_string().contains("cmd argument is required"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_slow_command() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = get(&source_with_cmd("sleep 30"), &cancel).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
