use crate::descriptor::EnvironmentDescriptor;
use crate::error::QueryFailure;
use crate::exec::{run_lines, CommandRunner, Invocation, ProcessRunner};
use std::time::Duration;

pub const DEFAULT_LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub compose_program: String,
    pub compose_args: Vec<String>,
    pub docker_program: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            compose_program: "docker".to_string(),
            compose_args: vec!["compose".to_string()],
            docker_program: "docker".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub toolchain: Toolchain,
    pub lifecycle_timeout: Duration,
    pub command_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            toolchain: Toolchain::default(),
            lifecycle_timeout: DEFAULT_LIFECYCLE_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Lifecycle controller for one environment.
///
/// Borrows the caller's descriptor for the duration of an `up`/`down` cycle. All public
/// operations report failure through their return value (`false`, empty, `None`) and log
/// the underlying cause; none of them panic or return an error across the API, except
/// [`Environment::dump_logs`] whose only failure is writing the archive.
pub struct Environment<'a, R: CommandRunner = ProcessRunner> {
    descriptor: &'a EnvironmentDescriptor,
    runner: R,
    settings: Settings,
}

impl<'a> Environment<'a, ProcessRunner> {
    pub fn new(descriptor: &'a EnvironmentDescriptor) -> Self {
        Self::with_runner(descriptor, ProcessRunner)
    }
}

impl<'a, R: CommandRunner> Environment<'a, R> {
    pub fn with_runner(descriptor: &'a EnvironmentDescriptor, runner: R) -> Self {
        Self {
            descriptor,
            runner,
            settings: Settings::default(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn descriptor(&self) -> &EnvironmentDescriptor {
        self.descriptor
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub(crate) fn namespace(&self) -> &str {
        self.descriptor.namespace()
    }

    pub(crate) fn compose<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let toolchain = &self.settings.toolchain;
        let mut invocation = self
            .base_invocation(&toolchain.compose_program)
            .args(toolchain.compose_args.iter().cloned());
        for manifest in self.descriptor.manifest_paths() {
            invocation = invocation
                .arg("-f")
                .arg(manifest.to_string_lossy().to_string());
        }
        invocation
            .arg("-p")
            .arg(self.descriptor.namespace())
            .args(args)
    }

    pub(crate) fn docker<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_invocation(&self.settings.toolchain.docker_program)
            .args(args)
    }

    fn base_invocation(&self, program: &str) -> Invocation {
        Invocation::new(program, self.descriptor.working_directory())
            .envs(self.descriptor.environment_variables())
    }

    pub(crate) fn query_lines(&self, invocation: &Invocation) -> Result<Vec<String>, QueryFailure> {
        let result = run_lines(&self.runner, invocation, self.settings.command_timeout)?;
        Ok(result
            .lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }
}
