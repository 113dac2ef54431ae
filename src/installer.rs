// src/installer.rs

//! System installer backed by the `rpm` command
//!
//! Dependencies are handled by the resolver and the transaction order, so
//! `rpm` runs with `--nodeps`. Calls are made one at a time by the executor.

use crate::error::{Error, Result};
use crate::transaction::{InstallTarget, Installer, StepKind};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

/// Runs `rpm -i` / `rpm -e`
#[derive(Debug, Clone)]
pub struct RpmInstaller {
    program: PathBuf,
    root: Option<PathBuf>,
}

impl Default for RpmInstaller {
    fn default() -> Self {
        Self {
            program: PathBuf::from("rpm"),
            root: None,
        }
    }
}

impl RpmInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable in place of `rpm`
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Operate on an alternate root (`rpm --root`)
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn args(&self, target: InstallTarget<'_>, action: StepKind) -> Result<Vec<OsString>> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(root) = &self.root {
            args.push("--root".into());
            args.push(root.clone().into_os_string());
        }

        match (action, target) {
            (StepKind::Install, InstallTarget::Artifact(path)) => {
                args.extend(["-i", "--nodeps", "--replacefiles"].map(OsString::from));
                args.push(path.as_os_str().to_os_string());
            }
            (StepKind::Erase, InstallTarget::Installed(nevra)) => {
                args.extend(["-e", "--nodeps"].map(OsString::from));
                args.push(nevra.rpm_label().into());
            }
            (action, target) => {
                return Err(Error::InstallError(format!(
                    "Cannot {} {:?}",
                    action, target
                )));
            }
        }
        Ok(args)
    }
}

impl Installer for RpmInstaller {
    fn apply(&self, target: InstallTarget<'_>, action: StepKind) -> Result<()> {
        let args = self.args(target, action)?;
        debug!("Running {} {:?}", self.program.display(), args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                Error::InstallError(format!(
                    "Failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(Error::InstallError(format!(
                "{} {:?} failed ({}): {}",
                self.program.display(),
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        match target {
            InstallTarget::Artifact(path) => info!("Installed {}", path.display()),
            InstallTarget::Installed(nevra) => info!("Removed {}", nevra),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::Nevra;
    use crate::version::RpmVersion;
    use std::path::Path;

    fn nevra() -> Nevra {
        Nevra::new("foo", RpmVersion::parse("1.0-1").unwrap(), "x86_64")
    }

    #[test]
    fn test_install_arguments() {
        let installer = RpmInstaller::new().with_root("/mnt/sysimage");
        let args = installer
            .args(InstallTarget::Artifact(Path::new("/cache/foo.rpm")), StepKind::Install)
            .unwrap();
        assert_eq!(
            args,
            ["--root", "/mnt/sysimage", "-i", "--nodeps", "--replacefiles", "/cache/foo.rpm"]
                .map(OsString::from)
                .to_vec()
        );
    }

    #[test]
    fn test_erase_arguments() {
        let nevra = nevra();
        let args = RpmInstaller::new()
            .args(InstallTarget::Installed(&nevra), StepKind::Erase)
            .unwrap();
        assert_eq!(args, ["-e", "--nodeps", "foo-1.0-1.x86_64"].map(OsString::from).to_vec());
    }

    #[test]
    fn test_erase_leaves_out_epoch() {
        let nevra = Nevra::new("foo", RpmVersion::parse("1:2.0-3.fc40").unwrap(), "x86_64");
        let args = RpmInstaller::new()
            .args(InstallTarget::Installed(&nevra), StepKind::Erase)
            .unwrap();
        assert_eq!(
            args,
            ["-e", "--nodeps", "foo-2.0-3.fc40.x86_64"].map(OsString::from).to_vec()
        );
    }

    #[test]
    fn test_mismatched_target_rejected() {
        let nevra = nevra();
        let result = RpmInstaller::new().args(InstallTarget::Installed(&nevra), StepKind::Install);
        assert!(matches!(result, Err(Error::InstallError(_))));
    }

    #[test]
    fn test_exit_status_is_checked() {
        let nevra = nevra();
        let ok = RpmInstaller::new().with_program("true");
        assert!(ok.apply(InstallTarget::Installed(&nevra), StepKind::Erase).is_ok());

        let failing = RpmInstaller::new().with_program("false");
        assert!(matches!(
            failing.apply(InstallTarget::Installed(&nevra), StepKind::Erase),
            Err(Error::InstallError(_))
        ));

        let missing = RpmInstaller::new().with_program("/nonexistent/rpm");
        assert!(missing.apply(InstallTarget::Installed(&nevra), StepKind::Erase).is_err());
    }
}
