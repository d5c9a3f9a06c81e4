use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to run command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed while waiting on command `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("command failed with status {code} while running `{command}`")]
    NonZeroExit {
        command: String,
        code: i32,
        failure: Option<&'static str>,
    },
    #[error("command `{command}` did not finish within {}ms and was killed", timeout.as_millis())]
    TimedOut { command: String, timeout: Duration },
}

impl ExecutionError {
    pub fn command(&self) -> &str {
        match self {
            ExecutionError::Spawn { command, .. }
            | ExecutionError::Wait { command, .. }
            | ExecutionError::NonZeroExit { command, .. }
            | ExecutionError::TimedOut { command, .. } => command,
        }
    }

    /// True only when the runtime positively reported that the object does not exist.
    pub fn is_missing_object(&self) -> bool {
        matches!(
            self,
            ExecutionError::NonZeroExit {
                failure: Some(NO_SUCH_OBJECT),
                ..
            }
        )
    }
}

// Metadata lookups fail with this internally; public queries log it and return empty/none.
#[derive(Debug, Error)]
pub(crate) enum QueryFailure {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("unexpected output from `{command}`: {output:?}")]
    Malformed { command: String, output: String },
    #[error("container `{container}` does not belong to namespace `{namespace}`")]
    ForeignContainer { container: String, namespace: String },
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

#[derive(Debug, Error)]
pub enum TestbedError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("process error: {0}")]
    Process(String),
    #[error("log dump failed: {0}")]
    Dump(#[from] DumpError),
}

pub const NO_SUCH_OBJECT: &str = "no_such_object";

pub fn classify_failure(stderr: &str) -> (&'static str, Option<&'static str>) {
    let lower = stderr.to_lowercase();

    if lower.contains("unknown command: docker compose")
        || lower.contains("is not a docker command")
        || lower.contains("unknown shorthand flag: 'f' in -f")
    {
        return (
            "docker_compose_unavailable",
            Some("Docker Compose is unavailable. Install the compose plugin or set compose.program to docker-compose."),
        );
    }

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("failed to connect to the docker api")
        || lower.contains("error during connect")
    {
        return (
            "docker_daemon_unreachable",
            Some("Docker daemon is unreachable. Start Docker (or dockerd) and retry."),
        );
    }

    if lower.contains("port is already allocated")
        || lower.contains("bind: address already in use")
        || lower.contains("address already in use")
    {
        return (
            "docker_port_conflict",
            Some("A required host port is already in use. Free it or change the manifest mapping."),
        );
    }

    if lower.contains("no such container")
        || lower.contains("no such object")
        || lower.contains("no such network")
        || lower.contains("no such service")
    {
        return (NO_SUCH_OBJECT, None);
    }

    if lower.contains("denied") || lower.contains("unauthorized") || lower.contains("authentication")
    {
        return (
            "docker_registry_auth",
            Some("Authenticate with `docker login` for private images."),
        );
    }

    ("process_command_failed", None)
}

pub fn spawn_failure_code(err: &io::Error) -> (&'static str, Option<&'static str>) {
    if err.kind() == io::ErrorKind::NotFound {
        return (
            "docker_not_found",
            Some("Install Docker and ensure `docker` is on your PATH."),
        );
    }
    ("process_command_failed", None)
}
