use crate::environment::Environment;
use crate::error::QueryFailure;
use crate::exec::{run_lines, CommandRunner};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const HEALTH_BLOCK_FORMAT: &str = "--format={{ .State.Health }}";
const HEALTH_STATUS_FORMAT: &str = "--format={{ .State.Health.Status }}";
const NO_HEALTH_BLOCK: &str = "<nil>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    NoHealthCheck,
    Pending,
    Healthy,
    TimedOut,
}

impl<R: CommandRunner> Environment<'_, R> {
    pub fn wait_for_all_healthy(&self, timeout: Duration) -> bool {
        let containers = match self.try_project_container_ids() {
            Ok(containers) => containers,
            Err(err) => {
                warn!(namespace = self.namespace(), error = %err, "could not enumerate containers for health wait");
                return false;
            }
        };
        let checked: Vec<String> = containers
            .into_iter()
            .filter(|container_id| self.declares_health_check(container_id))
            .collect();
        if checked.is_empty() {
            debug!(namespace = self.namespace(), "no container declares a health check");
            return true;
        }

        info!(
            namespace = self.namespace(),
            containers = checked.len(),
            timeout_ms = timeout.as_millis() as u64,
            "waiting for containers to become healthy"
        );
        let states: Vec<(String, HealthState)> = thread::scope(|scope| {
            let handles: Vec<_> = checked
                .iter()
                .map(|container_id| {
                    let handle = scope.spawn(move || self.wait_until_healthy(container_id, timeout));
                    (container_id, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(container_id, handle)| {
                    let state = handle.join().unwrap_or(HealthState::TimedOut);
                    (container_id.clone(), state)
                })
                .collect()
        });

        let mut all_healthy = true;
        for (container_id, state) in &states {
            if *state != HealthState::Healthy {
                warn!(namespace = self.namespace(), container = %container_id, ?state, "container did not become healthy");
                all_healthy = false;
            }
        }
        all_healthy
    }

    pub fn health_state(&self, container_id: &str) -> HealthState {
        if !self.declares_health_check(container_id) {
            return HealthState::NoHealthCheck;
        }
        match self.health_status(container_id, self.settings().command_timeout) {
            Ok(status) if status == "healthy" => HealthState::Healthy,
            _ => HealthState::Pending,
        }
    }

    pub fn wait_until_healthy(&self, container_id: &str, timeout: Duration) -> HealthState {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return HealthState::TimedOut;
            }
            let probe_timeout = remaining.min(self.settings().command_timeout);
            match self.health_status(container_id, probe_timeout) {
                Ok(status) if status == "healthy" => return HealthState::Healthy,
                Ok(status) => debug!(container = container_id, status = %status, "container not healthy yet"),
                Err(err) => debug!(container = container_id, error = %err, "health probe failed"),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return HealthState::TimedOut;
            }
            thread::sleep(self.settings().poll_interval.min(remaining));
        }
    }

    // A container whose metadata cannot be read is polled anyway, so an unreadable
    // container never counts as vacuously healthy.
    fn declares_health_check(&self, container_id: &str) -> bool {
        match self.query_lines(&self.docker(["inspect", container_id, HEALTH_BLOCK_FORMAT])) {
            Ok(lines) => lines
                .first()
                .map(|block| block != NO_HEALTH_BLOCK)
                .unwrap_or(false),
            Err(err) => {
                warn!(container = container_id, error = %err, "health block lookup failed; polling anyway");
                true
            }
        }
    }

    fn health_status(&self, container_id: &str, timeout: Duration) -> Result<String, QueryFailure> {
        let invocation = self.docker(["inspect", container_id, HEALTH_STATUS_FORMAT]);
        let result = run_lines(self.runner(), &invocation, timeout)?;
        Ok(result
            .lines
            .first()
            .map(|line| line.trim().to_string())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EnvironmentDescriptor;
    use crate::environment::Settings;
    use crate::mock::{MockRunner, Reply};

    fn descriptor() -> EnvironmentDescriptor {
        EnvironmentDescriptor::new("perf1", "/work").manifest("compose.yml")
    }

    fn fast_settings() -> Settings {
        Settings {
            poll_interval: Duration::from_millis(10),
            ..Settings::default()
        }
    }

    #[test]
    fn no_health_checks_is_vacuous_success_even_with_zero_timeout() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("ps -q", MockRunner::lines(&["a", "b"]));
        runner.respond("{{ .State.Health }}", MockRunner::lines(&["<nil>"]));
        let env = Environment::with_runner(&descriptor, runner);

        assert!(env.wait_for_all_healthy(Duration::ZERO));
        assert_eq!(env.runner().count(".State.Health.Status"), 0);
    }

    #[test]
    fn empty_namespace_is_vacuously_healthy() {
        let descriptor = descriptor();
        let env = Environment::with_runner(&descriptor, MockRunner::default());
        assert!(env.wait_for_all_healthy(Duration::ZERO));
    }

    #[test]
    fn polls_until_healthy() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("ps -q", MockRunner::lines(&["db"]));
        runner.respond("inspect db --format={{ .State.Health }}", MockRunner::lines(&["{starting 0 []}"]));
        runner.respond("inspect db --format={{ .State.Health.Status }}", MockRunner::lines(&["starting"]));
        runner.respond("inspect db --format={{ .State.Health.Status }}", MockRunner::lines(&["starting"]));
        runner.respond("inspect db --format={{ .State.Health.Status }}", MockRunner::lines(&["healthy"]));
        let env = Environment::with_runner(&descriptor, runner).with_settings(fast_settings());

        assert!(env.wait_for_all_healthy(Duration::from_secs(5)));
        assert_eq!(env.runner().count(".State.Health.Status"), 3);
    }

    #[test]
    fn one_unhealthy_container_fails_the_wait() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("ps -q", MockRunner::lines(&["web", "db", "plain"]));
        runner.respond("inspect web --format={{ .State.Health }}", MockRunner::lines(&["{healthy 0 []}"]));
        runner.respond("inspect db --format={{ .State.Health }}", MockRunner::lines(&["{unhealthy 3 []}"]));
        runner.respond("inspect plain --format={{ .State.Health }}", MockRunner::lines(&["<nil>"]));
        runner.respond("inspect web --format={{ .State.Health.Status }}", MockRunner::lines(&["healthy"]));
        runner.respond("inspect db --format={{ .State.Health.Status }}", MockRunner::lines(&["unhealthy"]));
        let env = Environment::with_runner(&descriptor, runner).with_settings(fast_settings());

        let started = Instant::now();
        assert!(!env.wait_for_all_healthy(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(env.runner().count("inspect plain --format={{ .State.Health.Status }}"), 0);
    }

    #[test]
    fn hung_probe_is_bounded_by_the_deadline() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("ps -q", MockRunner::lines(&["db"]));
        runner.respond("{{ .State.Health }}", MockRunner::lines(&["{starting 0 []}"]));
        runner.respond(".State.Health.Status", Reply::Hang);
        let env = Environment::with_runner(&descriptor, runner).with_settings(fast_settings());

        let started = Instant::now();
        assert_eq!(
            env.wait_until_healthy("db", Duration::from_millis(150)),
            HealthState::TimedOut
        );
        assert!(started.elapsed() < Duration::from_secs(1));
        let probe = env
            .runner()
            .calls()
            .into_iter()
            .find(|call| call.line().contains(".State.Health.Status"))
            .unwrap();
        assert!(probe.timeout <= Duration::from_millis(150));
    }

    #[test]
    fn each_container_gets_the_full_timeout() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("ps -q", MockRunner::lines(&["a", "b", "c"]));
        runner.respond("{{ .State.Health }}", MockRunner::lines(&["{starting 0 []}"]));
        runner.respond(".State.Health.Status", MockRunner::lines(&["starting"]));
        let env = Environment::with_runner(&descriptor, runner).with_settings(fast_settings());

        let started = Instant::now();
        assert!(!env.wait_for_all_healthy(Duration::from_millis(300)));
        // concurrent polling: three containers finish in roughly one timeout, not three
        assert!(started.elapsed() < Duration::from_millis(800));
    }

    #[test]
    fn failed_enumeration_fails_the_wait() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("ps -q", Reply::Exit(1));
        let env = Environment::with_runner(&descriptor, runner);
        assert!(!env.wait_for_all_healthy(Duration::from_secs(1)));
    }

    #[test]
    fn health_state_reports_single_probe() {
        let descriptor = descriptor();
        let runner = MockRunner::default();
        runner.respond("inspect plain --format={{ .State.Health }}", MockRunner::lines(&["<nil>"]));
        runner.respond("inspect db --format={{ .State.Health }}", MockRunner::lines(&["{starting 0 []}"]));
        runner.respond("inspect db --format={{ .State.Health.Status }}", MockRunner::lines(&["starting"]));
        runner.respond("inspect ok --format={{ .State.Health }}", MockRunner::lines(&["{healthy 0 []}"]));
        runner.respond("inspect ok --format={{ .State.Health.Status }}", MockRunner::lines(&["healthy"]));
        let env = Environment::with_runner(&descriptor, runner);

        assert_eq!(env.health_state("plain"), HealthState::NoHealthCheck);
        assert_eq!(env.health_state("db"), HealthState::Pending);
        assert_eq!(env.health_state("ok"), HealthState::Healthy);
    }
}
