use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::process::Command;
use tracing::{debug, info, warn};

use common::{Error, Result};

/// Lifecycle of one execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Created,
    DependenciesInstalling,
    Ready,
    Running,
    TornDown,
    Error,
}

impl fmt::Display for EnvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvState::Created => write!(f, "created"),
            EnvState::DependenciesInstalling => write!(f, "installing"),
            EnvState::Ready => write!(f, "ready"),
            EnvState::Running => write!(f, "running"),
            EnvState::TornDown => write!(f, "torn-down"),
            EnvState::Error => write!(f, "error"),
        }
    }
}

/// Creates and tracks per-request virtual environments under one root
/// directory. Environment ids are caller-supplied; a live environment with
/// the same id is rejected, never reused or queued behind.
pub struct Provisioner {
    python_bin: String,
    root: PathBuf,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Provisioner {
    pub fn new(python_bin: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            python_bin: python_bin.into(),
            root: root.into(),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Number of environments currently provisioned and not yet torn down.
    pub fn active_count(&self) -> usize {
        self.active.lock().expect("registry lock").len()
    }

    /// Allocate a fresh environment keyed by `id`.
    pub async fn create(&self, id: &str) -> Result<Environment> {
        validate_id(id)?;
        {
            let mut active = self.active.lock().expect("registry lock");
            if !active.insert(id.to_string()) {
                return Err(Error::Provisioning(format!(
                    "environment '{id}' already exists and is not torn down"
                )));
            }
        }
        let result = self.bootstrap(id).await;
        if result.is_err() {
            self.active.lock().expect("registry lock").remove(id);
        }
        result
    }

    async fn bootstrap(&self, id: &str) -> Result<Environment> {
        let dir = self.root.join(id);
        if dir.exists() {
            return Err(Error::Provisioning(format!(
                "environment directory '{}' already exists",
                dir.display()
            )));
        }
        tokio::fs::create_dir_all(&self.root).await?;

        info!(environment = %id, "creating virtual environment");
        let output = Command::new(&self.python_bin)
            .arg("-m")
            .arg("venv")
            .arg(&dir)
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::Provisioning(stderr_text(&output)));
        }

        Ok(Environment {
            id: id.to_string(),
            dir,
            state: EnvState::Created,
            active: Arc::clone(&self.active),
        })
    }
}

/// A disposable runtime scoped to exactly one request. Owns its installed
/// dependency set; destroyed deterministically via [`Environment::teardown`].
#[derive(Debug)]
pub struct Environment {
    id: String,
    dir: PathBuf,
    state: EnvState,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Environment {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> EnvState {
        self.state
    }

    pub fn python_path(&self) -> PathBuf {
        let exe = if cfg!(windows) { "python.exe" } else { "python" };
        self.dir.join(bin_dir()).join(exe)
    }

    fn pip_path(&self) -> PathBuf {
        let exe = if cfg!(windows) { "pip.exe" } else { "pip" };
        self.dir.join(bin_dir()).join(exe)
    }

    /// Install the declared dependencies one at a time, in order, each with
    /// whatever version currently resolves. The first failure aborts the
    /// remainder and leaves the environment in `Error`.
    pub async fn install(&mut self, packages: &[String]) -> Result<()> {
        if self.state != EnvState::Created {
            return Err(Error::Provisioning(format!(
                "environment '{}' is {}, expected created",
                self.id, self.state
            )));
        }
        self.state = EnvState::DependenciesInstalling;

        for package in packages {
            debug!(environment = %self.id, package = %package, "installing dependency");
            let spawned = Command::new(self.pip_path())
                .arg("install")
                .arg(package)
                .output()
                .await;
            let output = match spawned {
                Ok(output) => output,
                Err(e) => {
                    self.state = EnvState::Error;
                    return Err(Error::DependencyInstall {
                        package: package.clone(),
                        detail: e.to_string(),
                    });
                }
            };
            if !output.status.success() {
                self.state = EnvState::Error;
                return Err(Error::DependencyInstall {
                    package: package.clone(),
                    detail: stderr_text(&output),
                });
            }
        }

        self.state = EnvState::Ready;
        Ok(())
    }

    /// Transition into `Running`; the driver calls this before spawning.
    pub(crate) fn begin_run(&mut self) -> Result<()> {
        if self.state != EnvState::Ready {
            return Err(Error::Provisioning(format!(
                "environment '{}' is {}, expected ready",
                self.id, self.state
            )));
        }
        self.state = EnvState::Running;
        Ok(())
    }

    /// Mark the environment failed.
    pub fn fail(&mut self) {
        if self.state != EnvState::TornDown {
            self.state = EnvState::Error;
        }
    }

    /// Unconditionally remove the environment directory with everything
    /// installed into it, and release the id for reuse.
    pub async fn teardown(mut self) -> Result<()> {
        self.state = EnvState::TornDown;
        let removal = match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        };
        self.release();
        info!(environment = %self.id, "environment torn down");
        removal
    }

    fn release(&self) {
        self.active.lock().expect("registry lock").remove(&self.id);
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        // Release the id reservation when an environment escapes without an
        // explicit teardown (panic unwind, dropped future).
        if self.state != EnvState::TornDown {
            warn!(environment = %self.id, "environment dropped without teardown");
            self.release();
        }
    }
}

fn bin_dir() -> &'static str {
    if cfg!(windows) {
        "Scripts"
    } else {
        "bin"
    }
}

/// Ids become directory names, so only filename-safe characters are allowed.
fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::Provisioning(format!(
            "environment id '{id}' is not a filename-safe identifier"
        )))
    }
}

fn stderr_text(output: &std::process::Output) -> String {
    let err = String::from_utf8_lossy(&output.stderr);
    let err = err.trim();
    if err.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_with_path_separators_are_rejected() {
        assert!(validate_id("../escape").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("").is_err());
        assert!(validate_id("req-42_x").is_ok());
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(EnvState::DependenciesInstalling.to_string(), "installing");
        assert_eq!(EnvState::TornDown.to_string(), "torn-down");
    }
}
