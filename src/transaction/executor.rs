// src/transaction/executor.rs

//! Carrying out a transaction
//!
//! Steps run strictly in order and one at a time. While one package is being
//! installed the next artifact is already downloading on a worker thread. The
//! first failure halts execution; nothing is rolled back.

use super::{Step, StepKind, Transaction};
use crate::error::{Error, Result};
use crate::packages::{Nevra, Package};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::sync_channel;
use std::thread;
use tracing::{debug, info, warn};

/// Fetches package artifacts
pub trait Downloader {
    /// Download `url` into a local file called `name`
    fn fetch(&self, url: &str, name: &str) -> Result<PathBuf>;
}

/// Checks downloaded artifacts
pub trait Verifier {
    fn verify(&self, path: &Path, package: &Package) -> bool;
}

/// What the installer acts on
#[derive(Debug, Clone, Copy)]
pub enum InstallTarget<'a> {
    /// A downloaded artifact
    Artifact(&'a Path),
    /// An installed package
    Installed(&'a Nevra),
}

/// Applies steps to the system
pub trait Installer {
    fn apply(&self, target: InstallTarget<'_>, action: StepKind) -> Result<()>;
}

/// The step that stopped execution
#[derive(Debug)]
pub struct FailedStep {
    pub step: Step,
    pub error: Error,
}

/// Outcome of executing a transaction
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub completed: Vec<Step>,
    pub failed: Option<FailedStep>,
    /// Steps never attempted
    pub remaining: Vec<Step>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Completed {} step(s)", self.completed.len())?;
        for step in &self.completed {
            writeln!(f, "  done     {}", step)?;
        }
        if let Some(failed) = &self.failed {
            writeln!(f, "  FAILED   {}: {}", failed.step, failed.error)?;
        }
        for step in &self.remaining {
            writeln!(f, "  skipped  {}", step)?;
        }
        Ok(())
    }
}

/// File name for an artifact location
fn artifact_name(package: &Package) -> String {
    package
        .location
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.rpm", package.nevra))
}

/// Runs transactions through a downloader, a verifier and an installer
pub struct Executor<'a, D, V, I> {
    downloader: &'a D,
    verifier: &'a V,
    installer: &'a I,
}

impl<'a, D, V, I> Executor<'a, D, V, I>
where
    D: Downloader + Sync,
    V: Verifier,
    I: Installer,
{
    pub fn new(downloader: &'a D, verifier: &'a V, installer: &'a I) -> Self {
        Self {
            downloader,
            verifier,
            installer,
        }
    }

    /// Execute every step in order
    ///
    /// `on_applied` is called after each step succeeds; an error from it is
    /// logged and does not stop execution.
    pub fn execute<F>(&self, transaction: &Transaction, mut on_applied: F) -> ExecutionReport
    where
        F: FnMut(&Step) -> Result<()>,
    {
        let steps = transaction.steps();
        let mut report = ExecutionReport::default();
        if steps.is_empty() {
            return report;
        }

        let downloads: Vec<&Package> = steps
            .iter()
            .filter(|s| s.kind == StepKind::Install)
            .map(|s| &s.package)
            .collect();
        let downloader = self.downloader;

        thread::scope(|scope| {
            // One artifact waits in the channel while the next one downloads
            let (tx, rx) = sync_channel::<Result<PathBuf>>(1);
            scope.spawn(move || {
                for package in downloads {
                    let result = downloader.fetch(&package.location, &artifact_name(package));
                    if tx.send(result).is_err() {
                        debug!("Download worker stopping early");
                        break;
                    }
                }
            });

            for (index, step) in steps.iter().enumerate() {
                info!("[{}/{}] {}", index + 1, steps.len(), step);
                let outcome = match step.kind {
                    StepKind::Install => rx
                        .recv()
                        .unwrap_or_else(|_| {
                            Err(Error::DownloadError("download worker stopped".to_string()))
                        })
                        .and_then(|path| self.install(step, &path)),
                    StepKind::Erase => self
                        .installer
                        .apply(InstallTarget::Installed(&step.package.nevra), StepKind::Erase),
                };

                match outcome {
                    Ok(()) => {
                        if let Err(e) = on_applied(step) {
                            warn!("Failed to record {}: {}", step, e);
                        }
                        report.completed.push(step.clone());
                    }
                    Err(error) => {
                        warn!("Step {} failed: {}", step, error);
                        report.failed = Some(FailedStep {
                            step: step.clone(),
                            error,
                        });
                        report.remaining = steps[index + 1..].to_vec();
                        break;
                    }
                }
            }
            drop(rx);
        });

        report
    }

    fn install(&self, step: &Step, path: &Path) -> Result<()> {
        if !self.verifier.verify(path, &step.package) {
            return Err(Error::VerificationError(format!(
                "{} failed verification",
                path.display()
            )));
        }
        self.installer
            .apply(InstallTarget::Artifact(path), StepKind::Install)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::RpmVersion;
    use std::cell::RefCell;
    use std::sync::Mutex;

    struct FakeDownloader {
        fail_on: Option<&'static str>,
        fetched: Mutex<Vec<String>>,
    }

    impl Downloader for FakeDownloader {
        fn fetch(&self, url: &str, name: &str) -> Result<PathBuf> {
            if let Ok(mut fetched) = self.fetched.lock() {
                fetched.push(name.to_string());
            }
            if self.fail_on.is_some_and(|bad| url.contains(bad)) {
                return Err(Error::DownloadError(format!("404 for {}", url)));
            }
            Ok(PathBuf::from(format!("/cache/{}", name)))
        }
    }

    struct FakeVerifier {
        reject: Option<&'static str>,
    }

    impl Verifier for FakeVerifier {
        fn verify(&self, path: &Path, _package: &Package) -> bool {
            !self
                .reject
                .is_some_and(|bad| path.to_string_lossy().contains(bad))
        }
    }

    #[derive(Default)]
    struct RecordingInstaller {
        log: RefCell<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl Installer for RecordingInstaller {
        fn apply(&self, target: InstallTarget<'_>, action: StepKind) -> Result<()> {
            let entry = match target {
                InstallTarget::Artifact(path) => format!("{} {}", action, path.display()),
                InstallTarget::Installed(nevra) => format!("{} {}", action, nevra),
            };
            if self.fail_on.is_some_and(|bad| entry.contains(bad)) {
                return Err(Error::InstallError(format!("rpm failed: {}", entry)));
            }
            self.log.borrow_mut().push(entry);
            Ok(())
        }
    }

    fn step(kind: StepKind, name: &str) -> Step {
        let mut pkg = Package::new(name, RpmVersion::parse("1.0-1").unwrap(), "x86_64");
        pkg.location = format!("https://mirror/Packages/{}-1.0-1.x86_64.rpm", name);
        Step::new(kind, pkg)
    }

    fn transaction() -> Transaction {
        Transaction {
            steps: vec![
                step(StepKind::Install, "libbar"),
                step(StepKind::Install, "foo"),
                step(StepKind::Erase, "oldfoo"),
            ],
        }
    }

    fn downloader(fail_on: Option<&'static str>) -> FakeDownloader {
        FakeDownloader {
            fail_on,
            fetched: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_executes_in_order() {
        let downloader = downloader(None);
        let verifier = FakeVerifier { reject: None };
        let installer = RecordingInstaller::default();
        let mut recorded = Vec::new();

        let report = Executor::new(&downloader, &verifier, &installer).execute(&transaction(), |s| {
            recorded.push(s.to_string());
            Ok(())
        });

        assert!(report.is_success());
        assert_eq!(report.completed.len(), 3);
        assert_eq!(
            *installer.log.borrow(),
            vec![
                "install /cache/libbar-1.0-1.x86_64.rpm",
                "install /cache/foo-1.0-1.x86_64.rpm",
                "erase oldfoo-1.0-1.x86_64",
            ]
        );
        assert_eq!(recorded.len(), 3);
    }

    #[test]
    fn test_download_failure_halts() {
        let downloader = downloader(Some("/foo-"));
        let verifier = FakeVerifier { reject: None };
        let installer = RecordingInstaller::default();

        let report = Executor::new(&downloader, &verifier, &installer).execute(&transaction(), |_| Ok(()));

        assert_eq!(report.completed.len(), 1);
        let failed = report.failed.as_ref().unwrap();
        assert_eq!(failed.step.package.name(), "foo");
        assert!(matches!(failed.error, Error::DownloadError(_)));
        assert_eq!(report.remaining.len(), 1);
        assert_eq!(report.remaining[0].kind, StepKind::Erase);
    }

    #[test]
    fn test_verification_failure_halts_before_install() {
        let downloader = downloader(None);
        let verifier = FakeVerifier { reject: Some("libbar") };
        let installer = RecordingInstaller::default();

        let report = Executor::new(&downloader, &verifier, &installer).execute(&transaction(), |_| Ok(()));

        assert!(report.completed.is_empty());
        assert!(matches!(
            report.failed.as_ref().unwrap().error,
            Error::VerificationError(_)
        ));
        assert_eq!(report.remaining.len(), 2);
        assert!(installer.log.borrow().is_empty());
    }

    #[test]
    fn test_install_failure_reports_partial_state() {
        let downloader = downloader(None);
        let verifier = FakeVerifier { reject: None };
        let installer = RecordingInstaller {
            fail_on: Some("erase"),
            ..Default::default()
        };

        let report = Executor::new(&downloader, &verifier, &installer).execute(&transaction(), |_| Ok(()));

        assert_eq!(report.completed.len(), 2);
        assert!(matches!(
            report.failed.as_ref().unwrap().error,
            Error::InstallError(_)
        ));
        assert!(report.remaining.is_empty());
        assert!(report.to_string().contains("FAILED"));
    }

    #[test]
    fn test_recording_failure_does_not_halt() {
        let downloader = downloader(None);
        let verifier = FakeVerifier { reject: None };
        let installer = RecordingInstaller::default();

        let report = Executor::new(&downloader, &verifier, &installer)
            .execute(&transaction(), |_| Err(Error::IoError("disk full".to_string())));
        assert!(report.is_success());
    }

    #[test]
    fn test_empty_transaction() {
        let downloader = downloader(None);
        let verifier = FakeVerifier { reject: None };
        let installer = RecordingInstaller::default();
        let report =
            Executor::new(&downloader, &verifier, &installer).execute(&Transaction::default(), |_| Ok(()));
        assert!(report.is_success() && report.completed.is_empty());
        assert!(downloader.fetched.lock().unwrap().is_empty());
    }
}
