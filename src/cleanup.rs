use crate::environment::Environment;
use crate::error::QueryFailure;
use crate::exec::{run_status, CommandRunner};
use tracing::{debug, error, info, warn};

const PROJECT_LABEL: &str = "com.docker.compose.project";

impl<R: CommandRunner> Environment<'_, R> {
    pub fn clean_up(&self) -> bool {
        info!(namespace = self.namespace(), "cleaning up environment");
        let (enumerated, containers) = match self.labelled_container_ids() {
            Ok(containers) => (true, containers),
            Err(err) => {
                error!(namespace = self.namespace(), error = %err, "could not enumerate containers");
                (false, Vec::new())
            }
        };

        let mut stopped = true;
        for container_id in &containers {
            if !self.settle_container(&["stop", container_id.as_str()], container_id) {
                stopped = false;
            }
        }
        let mut removed = true;
        for container_id in &containers {
            if !self.settle_container(&["rm", "-f", container_id.as_str()], container_id) {
                removed = false;
            }
        }
        let networks_removed = self.remove_project_networks();

        if !stopped {
            error!(namespace = self.namespace(), "stopping containers failed");
        }
        if !removed {
            error!(namespace = self.namespace(), "removing containers failed");
        }
        if !networks_removed {
            error!(namespace = self.namespace(), "removing project network failed");
        }
        enumerated && stopped && removed && networks_removed
    }

    // Includes exited containers and does not need the manifests to still exist.
    fn labelled_container_ids(&self) -> Result<Vec<String>, QueryFailure> {
        let filter = format!("label={PROJECT_LABEL}={}", self.namespace());
        self.query_lines(&self.docker(["ps", "-a", "-q", "--filter", filter.as_str()]))
    }

    fn settle_container(&self, args: &[&str], container_id: &str) -> bool {
        let invocation = self.docker(args.iter().copied());
        if run_status(self.runner(), &invocation, self.settings().command_timeout) {
            return true;
        }
        if self.container_gone(container_id) {
            debug!(container = container_id, "container already gone");
            return true;
        }
        warn!(container = container_id, command = %invocation.render(), "container step failed");
        false
    }

    // Only a runtime "no such object" answer proves absence; timeouts and daemon errors do not.
    fn container_gone(&self, container_id: &str) -> bool {
        match self.query_lines(&self.docker(["inspect", "--format={{.Id}}", container_id])) {
            Err(QueryFailure::Execution(err)) => err.is_missing_object(),
            _ => false,
        }
    }

    // The runtime's name filter matches substrings, so only exact names are kept.
    fn project_network_ids(&self) -> Result<Vec<String>, QueryFailure> {
        let name = self.descriptor().network_name();
        let filter = format!("name={name}");
        let lines = self.query_lines(&self.docker([
            "network",
            "ls",
            "--filter",
            filter.as_str(),
            "--format={{.ID}} {{.Name}}",
        ]))?;
        Ok(lines
            .iter()
            .filter_map(|line| {
                let (id, found) = line.split_once(' ')?;
                (found.trim() == name).then(|| id.to_string())
            })
            .collect())
    }

    fn remove_project_networks(&self) -> bool {
        let networks = match self.project_network_ids() {
            Ok(networks) => networks,
            Err(err) => {
                warn!(namespace = self.namespace(), error = %err, "network lookup failed");
                return false;
            }
        };
        let mut removed = true;
        for network_id in &networks {
            let invocation = self.docker(["network", "rm", network_id.as_str()]);
            if run_status(self.runner(), &invocation, self.settings().command_timeout) {
                continue;
            }
            let still_present = self
                .project_network_ids()
                .map(|remaining| remaining.contains(network_id))
                .unwrap_or(true);
            if still_present {
                warn!(network = %network_id, "network removal failed");
                removed = false;
            } else {
                debug!(network = %network_id, "network already gone");
            }
        }
        removed
    }
}
