use crate::environment::Environment;
use crate::exec::{run_status, CommandRunner};
use std::time::Duration;
use tracing::{error, info};

impl<R: CommandRunner> Environment<'_, R> {
    pub fn up(&self, timeout: Duration) -> bool {
        info!(
            namespace = self.namespace(),
            manifests = self.descriptor().manifest_paths().len(),
            timeout_ms = timeout.as_millis() as u64,
            "bringing environment up"
        );
        if !run_status(self.runner(), &self.compose(["up", "-d"]), timeout) {
            error!(namespace = self.namespace(), "compose up failed");
            return false;
        }
        let healthy = self.wait_for_all_healthy(timeout);
        if healthy {
            info!(namespace = self.namespace(), "environment is up and healthy");
        } else {
            error!(namespace = self.namespace(), "environment did not become healthy");
        }
        healthy
    }

    /// Takes the environment down. Succeeds only if the tool reports success and no
    /// container of the namespace is left afterwards; the exit code alone is not trusted.
    pub fn down(&self) -> bool {
        info!(namespace = self.namespace(), "bringing environment down");
        let command_ok = run_status(
            self.runner(),
            &self.compose(["down"]),
            self.settings().lifecycle_timeout,
        );
        if !command_ok {
            error!(namespace = self.namespace(), "compose down failed");
        }
        let drained = match self.try_project_container_ids() {
            Ok(remaining) if remaining.is_empty() => true,
            Ok(remaining) => {
                error!(
                    namespace = self.namespace(),
                    remaining = remaining.len(),
                    "containers left behind after down"
                );
                false
            }
            Err(err) => {
                error!(namespace = self.namespace(), error = %err, "could not verify teardown");
                false
            }
        };
        command_ok && drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EnvironmentDescriptor;
    use crate::environment::Settings;
    use crate::mock::{MockRunner, Reply};

    fn descriptor() -> EnvironmentDescriptor {
        EnvironmentDescriptor::new("perf1", "/work")
            .manifest("base.yml")
            .manifest("perf.yml")
            .env("TAG", "1.2.3")
    }

    #[test]
    fn up_issues_detached_up_with_manifests_in_order() {
        let descriptor = descriptor();
        let env = Environment::with_runner(&descriptor, MockRunner::default());
        assert!(env.up(Duration::from_secs(30)));

        let calls = env.runner().calls();
        let up = &calls[0];
        assert_eq!(
            up.args,
            ["compose", "-f", "base.yml", "-f", "perf.yml", "-p", "perf1", "up", "-d"]
        );
        assert!(!up.capture_output);
        assert_eq!(up.timeout, Duration::from_secs(30));
        assert_eq!(up.env.get("TAG").map(String::as_str), Some("1.2.3"));
        assert_eq!(up.cwd, std::path::PathBuf::from("/work"));
    }

    #[test]
    fn up_stops_when_compose_fails() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("up -d", Reply::Exit(1));
        let env = Environment::with_runner(&descriptor, runner);
        assert!(!env.up(Duration::from_secs(30)));
        assert_eq!(env.runner().calls().len(), 1);
    }

    #[test]
    fn up_timeout_is_a_failure() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("up -d", Reply::TimedOut);
        let env = Environment::with_runner(&descriptor, runner);
        assert!(!env.up(Duration::from_secs(1)));
    }

    #[test]
    fn up_fails_when_a_container_never_becomes_healthy() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("ps -q", MockRunner::lines(&["db"]));
        runner.respond("{{ .State.Health }}", MockRunner::lines(&["{starting 0 []}"]));
        runner.respond(".State.Health.Status", MockRunner::lines(&["starting"]));
        let settings = Settings {
            poll_interval: Duration::from_millis(20),
            ..Settings::default()
        };
        let env = Environment::with_runner(&descriptor, runner).with_settings(settings);
        assert!(!env.up(Duration::from_millis(200)));
    }

    #[test]
    fn down_checks_for_leftover_containers() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("ps -q", MockRunner::lines(&["orphan"]));
        let env = Environment::with_runner(&descriptor, runner);
        assert!(!env.down());
        assert_eq!(env.runner().count("-p perf1 down"), 1);
    }

    #[test]
    fn down_requires_successful_command() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("down", Reply::Exit(1));
        let env = Environment::with_runner(&descriptor, runner);
        assert!(!env.down());
        // the post-condition is still checked for diagnostics
        assert_eq!(env.runner().count("ps -q"), 1);
    }

    #[test]
    fn down_fails_when_verification_fails() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("ps -q", Reply::Exit(1));
        let env = Environment::with_runner(&descriptor, runner);
        assert!(!env.down());
    }

    #[test]
    fn up_then_down_leaves_nothing() {
        let descriptor = descriptor();
        let env = Environment::with_runner(&descriptor, MockRunner::default());
        assert!(env.up(Duration::from_secs(5)));
        assert!(env.down());
        assert!(env.project_container_ids().is_empty());
    }
}
