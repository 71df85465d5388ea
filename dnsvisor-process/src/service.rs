//! Service manager seam and its systemd implementation.

use std::path::PathBuf;
use std::process::Command;

use nix::sys::signal::Signal;

use crate::error::ServiceError;

/// Controls named system units. Every call is synchronous and fallible.
pub trait ServiceManager: Send + Sync {
    fn start(&self, unit: &str) -> Result<(), ServiceError>;
    fn stop(&self, unit: &str) -> Result<(), ServiceError>;
    /// Reload if the unit supports it, restart otherwise.
    fn reload(&self, unit: &str) -> Result<(), ServiceError>;
    fn restart(&self, unit: &str) -> Result<(), ServiceError>;
    fn signal(&self, unit: &str, signal: Signal) -> Result<(), ServiceError>;
}

/// Drives units through the `systemctl` binary.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: PathBuf,
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new("systemctl")
    }
}

impl Systemctl {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, verb: &str, extra: Option<String>, unit: &str) -> Result<(), ServiceError> {
        let program = self.program.display().to_string();
        let mut cmd = Command::new(&self.program);
        cmd.arg(verb);
        if let Some(flag) = &extra {
            cmd.arg(flag);
        }
        cmd.arg(unit);

        tracing::debug!(%program, verb, unit, "invoking service manager");
        let output = cmd.output().map_err(|e| ServiceError::Spawn {
            program: program.clone(),
            message: e.to_string(),
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Err(ServiceError::Failed {
            program,
            verb: verb.to_string(),
            unit: unit.to_string(),
            status: output.status.to_string(),
            output: format!("{stdout} {stderr}").trim().to_string(),
        })
    }
}

impl ServiceManager for Systemctl {
    fn start(&self, unit: &str) -> Result<(), ServiceError> {
        self.run("start", None, unit)
    }

    fn stop(&self, unit: &str) -> Result<(), ServiceError> {
        self.run("stop", None, unit)
    }

    fn reload(&self, unit: &str) -> Result<(), ServiceError> {
        self.run("reload-or-restart", None, unit)
    }

    fn restart(&self, unit: &str) -> Result<(), ServiceError> {
        self.run("restart", None, unit)
    }

    fn signal(&self, unit: &str, signal: Signal) -> Result<(), ServiceError> {
        self.run("kill", Some(format!("--signal={}", signal.as_str())), unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn fake_systemctl(dir: &std::path::Path, exit: i32) -> (PathBuf, PathBuf) {
        let log = dir.join("calls.log");
        let script = dir.join("systemctl");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\necho oops >&2\nexit {exit}\n",
                log.display()
            ),
        )
        .expect("write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
        (script, log)
    }

    #[test]
    fn verbs_map_to_systemctl_arguments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (script, log) = fake_systemctl(dir.path(), 0);
        let mgr = Systemctl::new(&script);

        mgr.start("dnsmasq@blue.service").expect("start");
        mgr.reload("dnsmasq@blue.service").expect("reload");
        mgr.signal("dnsmasq@blue.service", Signal::SIGUSR1)
            .expect("signal");

        let calls = fs::read_to_string(log).expect("read log");
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(
            lines,
            vec![
                "start dnsmasq@blue.service",
                "reload-or-restart dnsmasq@blue.service",
                "kill --signal=SIGUSR1 dnsmasq@blue.service",
            ]
        );
    }

    #[test]
    fn non_zero_exit_is_reported_with_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (script, _log) = fake_systemctl(dir.path(), 3);
        let err = Systemctl::new(&script)
            .restart("dnsmasq@default.service")
            .unwrap_err();
        match err {
            ServiceError::Failed { verb, unit, output, .. } => {
                assert_eq!(verb, "restart");
                assert_eq!(unit, "dnsmasq@default.service");
                assert!(output.contains("oops"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let err = Systemctl::new("/nonexistent/systemctl")
            .stop("x.service")
            .unwrap_err();
        assert!(matches!(err, ServiceError::Spawn { .. }), "got: {err}");
    }
}
