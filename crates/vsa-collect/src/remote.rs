use crate::CollectError;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

/// Seam between collectors and process execution.
pub trait RemoteExec {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CollectError>;
}

/// Runs commands on the local machine with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExec;

impl RemoteExec for SystemExec {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CollectError> {
        debug!(program, args = %args.join(" "), "running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| CollectError::Launch {
                program: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs `args` on every host through pdsh and returns the combined,
/// host-prefixed stdout. A non-zero exit only means some hosts failed, so
/// it is logged and whatever output arrived is still returned.
pub fn pdsh(
    exec: &(impl RemoteExec + ?Sized),
    hosts: &[String],
    args: &[String],
    connect_timeout_secs: u64,
) -> Result<String, CollectError> {
    if hosts.is_empty() {
        return Ok(String::new());
    }

    let mut command = vec![
        "-u".to_string(),
        connect_timeout_secs.to_string(),
        "-w".to_string(),
        hosts.join(","),
    ];
    command.extend(args.iter().cloned());

    let output = exec.run("pdsh", &command)?;
    log_stderr("pdsh", &output.stderr);
    if !output.success {
        warn!(
            status = %output.status,
            command = %args.join(" "),
            "pdsh reported failures on some hosts"
        );
    }
    Ok(output.stdout)
}

/// Copies `local` to `remote` on every host.
pub fn pdcp(
    exec: &(impl RemoteExec + ?Sized),
    hosts: &[String],
    local: &Path,
    remote: &str,
    connect_timeout_secs: u64,
) -> Result<(), CollectError> {
    if hosts.is_empty() {
        return Ok(());
    }
    if !local.exists() {
        return Err(CollectError::MissingAgent(local.to_path_buf()));
    }

    let command = vec![
        "-u".to_string(),
        connect_timeout_secs.to_string(),
        "-w".to_string(),
        hosts.join(","),
        local.display().to_string(),
        remote.to_string(),
    ];
    let output = exec.run("pdcp", &command)?;
    log_stderr("pdcp", &output.stderr);
    if !output.success {
        warn!(status = %output.status, remote, "pdcp failed on some hosts");
    }
    Ok(())
}

/// Runs a single command over ssh; any failure is an error.
pub fn ssh(
    exec: &(impl RemoteExec + ?Sized),
    host: &str,
    command: &str,
) -> Result<String, CollectError> {
    let output = exec.run("ssh", &[host.to_string(), command.to_string()])?;
    if !output.success {
        return Err(CollectError::CommandFailed {
            program: format!("ssh {host} {command}"),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Groups pdsh output lines (`host: text`) by host, keeping line order.
pub fn fold_by_host(output: &str) -> BTreeMap<String, Vec<String>> {
    let mut hosts: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((host, text)) = line.split_once(": ") else {
            warn!(line, "unreadable pdsh line");
            continue;
        };
        if host.is_empty() || host.contains(char::is_whitespace) {
            warn!(line, "unreadable pdsh line");
            continue;
        }
        hosts
            .entry(host.to_string())
            .or_default()
            .push(text.to_string());
    }

    hosts
}

fn log_stderr(program: &str, stderr: &str) {
    for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
        warn!(program, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recorder {
        calls: RefCell<Vec<(String, Vec<String>)>>,
        output: CommandOutput,
    }

    impl Recorder {
        fn new(success: bool, stdout: &str) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                output: CommandOutput {
                    success,
                    status: if success { "exit status: 0" } else { "exit status: 1" }.to_string(),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            }
        }
    }

    impl RemoteExec for Recorder {
        fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CollectError> {
            self.calls
                .borrow_mut()
                .push((program.to_string(), args.to_vec()));
            Ok(self.output.clone())
        }
    }

    #[test]
    fn pdsh_builds_fanout_command_and_tolerates_partial_failure() {
        let exec = Recorder::new(false, "cc1-p: ok\n");
        let hosts = vec!["cc1-p".to_string(), "cc2-p".to_string()];
        let stdout = pdsh(&exec, &hosts, &["itadm".to_string(), "list-target".to_string()], 15)
            .expect("pdsh output");
        assert_eq!(stdout, "cc1-p: ok\n");

        let calls = exec.calls.borrow();
        assert_eq!(calls[0].0, "pdsh");
        assert_eq!(
            calls[0].1,
            vec!["-u", "15", "-w", "cc1-p,cc2-p", "itadm", "list-target"]
        );
    }

    #[test]
    fn pdsh_skips_empty_host_lists() {
        let exec = Recorder::new(true, "unused");
        assert_eq!(pdsh(&exec, &[], &["true".to_string()], 15).expect("pdsh"), "");
        assert!(exec.calls.borrow().is_empty());
    }

    #[test]
    fn ssh_failure_is_an_error() {
        let exec = Recorder::new(false, "");
        let err = ssh(&exec, "m3-p", "./inventory_volumes3").expect_err("ssh fails");
        assert!(matches!(err, CollectError::CommandFailed { .. }));
        assert!(err.to_string().contains("m3-p"));
    }

    #[test]
    fn pdcp_requires_the_local_agent() {
        let exec = Recorder::new(true, "");
        let hosts = vec!["cc1-p".to_string()];
        let err = pdcp(&exec, &hosts, Path::new("/nonexistent/vsa"), "/tmp/vsa", 15)
            .expect_err("missing agent");
        assert!(matches!(err, CollectError::MissingAgent(_)));
        assert!(exec.calls.borrow().is_empty());
    }

    #[test]
    fn fold_groups_lines_by_host_in_order() {
        let folded = fold_by_host(
            "cc2-p: {\"virsh\": [],\ncc1-p: {}\ncc2-p:  \"iscsiadm\": []}\ngarbage line\n",
        );
        assert_eq!(folded.len(), 2);
        assert_eq!(folded["cc1-p"], vec!["{}"]);
        assert_eq!(
            folded["cc2-p"],
            vec!["{\"virsh\": [],", " \"iscsiadm\": []}"]
        );
    }
}
