//! rclone-backed transfer gateway.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::TransferGateway;

/// Runs the rclone CLI synchronously for each operation.
///
/// `flags` are placed before the subcommand on every call
/// (e.g. `--drive-shared-with-me`).
#[derive(Clone, Debug)]
pub struct RcloneGateway {
    binary: PathBuf,
    flags: Vec<String>,
}

impl RcloneGateway {
    pub fn new(binary: impl Into<PathBuf>, flags: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            flags,
        }
    }

    /// Full argument list for `rclone <flags> <op> <operands...>`.
    pub fn build_args(&self, op: &str, operands: &[&OsStr]) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.flags.iter().map(OsString::from).collect();
        args.push(OsString::from(op));
        args.extend(operands.iter().map(|operand| operand.to_os_string()));
        args
    }

    fn run(&self, op: &str, operands: &[&OsStr]) -> bool {
        let args = self.build_args(op, operands);
        log::info!(
            ">> {} {}",
            self.binary.display(),
            args.iter()
                .map(|arg| format!("{:?}", arg))
                .collect::<Vec<_>>()
                .join(" ")
        );

        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .status();
        match status {
            Ok(status) => {
                log::info!("rclone {} exited with {}", op, status);
                status.success()
            }
            Err(e) => {
                log::error!("failed to run {}: {}", self.binary.display(), e);
                false
            }
        }
    }
}

impl TransferGateway for RcloneGateway {
    fn copy(&mut self, remote_source: &str, local_dest: &Path) -> bool {
        self.run(
            "copy",
            &[OsStr::new(remote_source), local_dest.as_os_str()],
        )
    }

    fn mkdir(&mut self, remote_path: &str) -> bool {
        self.run("mkdir", &[OsStr::new(remote_path)])
    }

    fn move_to(&mut self, remote_source: &str, remote_dest: &str) -> bool {
        self.run(
            "moveto",
            &[OsStr::new(remote_source), OsStr::new(remote_dest)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_precede_subcommand() {
        let gateway = RcloneGateway::new("rclone", vec!["--drive-shared-with-me".to_string()]);
        let args = gateway.build_args(
            "moveto",
            &[OsStr::new("gdrive:a/b.zip"), OsStr::new("gdrive:done/1/b.zip")],
        );
        assert_eq!(
            args,
            vec![
                OsString::from("--drive-shared-with-me"),
                OsString::from("moveto"),
                OsString::from("gdrive:a/b.zip"),
                OsString::from("gdrive:done/1/b.zip"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_maps_to_success_flag() {
        let mut ok = RcloneGateway::new("true", Vec::new());
        assert!(ok.mkdir("gdrive:done/1"));

        let mut failing = RcloneGateway::new("false", Vec::new());
        assert!(!failing.move_to("gdrive:a", "gdrive:b"));
    }

    #[test]
    fn missing_binary_is_a_failure() {
        let mut gateway = RcloneGateway::new("/nonexistent/rclone-binary", Vec::new());
        assert!(!gateway.copy("gdrive:a.zip", Path::new("/tmp")));
    }
}
