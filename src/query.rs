use crate::environment::Environment;
use crate::error::QueryFailure;
use crate::exec::CommandRunner;
use std::net::IpAddr;
use tracing::warn;

const ADDRESS_FORMAT: &str =
    "--format={{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}";
const SHORT_ID_LEN: usize = 12;

impl<R: CommandRunner> Environment<'_, R> {
    pub fn service_container_ids(&self, service: &str) -> Vec<String> {
        self.query_lines(&self.compose(["ps", "-q", service]))
            .unwrap_or_else(|err| {
                warn!(namespace = self.namespace(), service, error = %err, "service container lookup failed");
                Vec::new()
            })
    }

    pub fn project_container_ids(&self) -> Vec<String> {
        self.try_project_container_ids().unwrap_or_else(|err| {
            warn!(namespace = self.namespace(), error = %err, "project container lookup failed");
            Vec::new()
        })
    }

    pub fn services(&self) -> Vec<String> {
        self.query_lines(&self.compose(["config", "--services"]))
            .unwrap_or_else(|err| {
                warn!(namespace = self.namespace(), error = %err, "service listing failed");
                Vec::new()
            })
    }

    /// Host port bound to `internal_port`, or `""` when there is no mapping, the id is not a
    /// full or short id of a container in this namespace, or the lookup failed.
    pub fn container_mapped_port(&self, container_id: &str, internal_port: u16) -> String {
        match self.try_mapped_port(container_id, internal_port) {
            Ok(port) => port,
            Err(err) => {
                warn!(container = container_id, internal_port, error = %err, "port lookup failed");
                String::new()
            }
        }
    }

    pub fn service_mapped_port(&self, service: &str, internal_port: u16) -> String {
        match self.service_container_ids(service).first() {
            Some(container_id) => self.container_mapped_port(container_id, internal_port),
            None => String::new(),
        }
    }

    pub fn container_address(&self, container_id: &str) -> Option<IpAddr> {
        match self.try_container_address(container_id) {
            Ok(address) => Some(address),
            Err(err) => {
                warn!(container = container_id, error = %err, "address lookup failed");
                None
            }
        }
    }

    pub fn service_container_ips(&self, service: &str) -> Vec<IpAddr> {
        self.service_container_ids(service)
            .iter()
            .filter_map(|container_id| self.container_address(container_id))
            .collect()
    }

    pub(crate) fn try_project_container_ids(&self) -> Result<Vec<String>, QueryFailure> {
        self.query_lines(&self.compose(["ps", "-q"]))
    }

    // The runtime resolves any unique prefix and any project's container, so ids are matched
    // against this namespace first.
    fn resolve_container(&self, container_id: &str) -> Result<String, QueryFailure> {
        let wanted = container_id.trim();
        self.try_project_container_ids()?
            .into_iter()
            .find(|listed| {
                listed == wanted
                    || (wanted.len() == SHORT_ID_LEN && listed.starts_with(wanted))
                    || (listed.len() == SHORT_ID_LEN && wanted.starts_with(listed.as_str()))
            })
            .ok_or_else(|| QueryFailure::ForeignContainer {
                container: wanted.to_string(),
                namespace: self.namespace().to_string(),
            })
    }

    fn try_mapped_port(&self, container_id: &str, internal_port: u16) -> Result<String, QueryFailure> {
        let container_id = self.resolve_container(container_id)?;
        let invocation = self.docker([
            "port",
            container_id.as_str(),
            internal_port.to_string().as_str(),
        ]);
        let lines = self.query_lines(&invocation)?;
        let Some(binding) = lines.first() else {
            return Ok(String::new());
        };
        parse_host_port(binding).ok_or_else(|| QueryFailure::Malformed {
            command: invocation.render(),
            output: binding.clone(),
        })
    }

    fn try_container_address(&self, container_id: &str) -> Result<IpAddr, QueryFailure> {
        let container_id = self.resolve_container(container_id)?;
        let invocation = self.docker(["inspect", container_id.as_str(), ADDRESS_FORMAT]);
        let lines = self.query_lines(&invocation)?;
        lines
            .iter()
            .flat_map(|line| line.split_whitespace())
            .find_map(|token| token.parse::<IpAddr>().ok())
            .ok_or_else(|| QueryFailure::Malformed {
                command: invocation.render(),
                output: lines.join("\n"),
            })
    }
}

// `0.0.0.0:8081`, `[::]:8081` and `:::8081` all yield `8081`.
fn parse_host_port(binding: &str) -> Option<String> {
    let (_, port) = binding.trim().rsplit_once(':')?;
    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(port.to_string())
}
