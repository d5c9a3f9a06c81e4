use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use testbed::config::{
    ensure_parent, expand_path, load_config, read_config, resolve_config_path, Config,
    DEFAULT_CONFIG_YAML,
};
use testbed::{
    run_status, Environment, EnvironmentDescriptor, Invocation, ProcessRunner, TestbedError,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "testbed", version, about = "Compose-based test environments")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[arg(long = "file", short = 'f', global = true)]
    files: Vec<PathBuf>,
    #[arg(long = "project", short = 'p', global = true)]
    project: Option<String>,
    #[arg(long = "project-directory", global = true)]
    project_directory: Option<PathBuf>,
    #[arg(long = "env", short = 'e', global = true)]
    env: Vec<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Up {
        #[arg(long)]
        timeout_sec: Option<u64>,
    },
    Down,
    Cleanup,
    Wait {
        #[arg(long)]
        timeout_sec: Option<u64>,
    },
    Ps {
        service: Option<String>,
    },
    Services,
    Port {
        target: String,
        port: u16,
        #[arg(long, default_value_t = false)]
        container: bool,
    },
    Address {
        target: String,
        #[arg(long, default_value_t = false)]
        container: bool,
    },
    Logs {
        name: Option<String>,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Doctor {
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Init,
    Show,
    Validate,
    Path,
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct Context {
    config_path: PathBuf,
    json: bool,
    files: Vec<PathBuf>,
    project: Option<String>,
    project_directory: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

fn main() -> Result<(), TestbedError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = cli.json;

    let result = build_context(&cli).and_then(|ctx| match cli.command {
        Commands::Up { timeout_sec } => handle_up(&ctx, timeout_sec),
        Commands::Down => handle_down(&ctx),
        Commands::Cleanup => handle_cleanup(&ctx),
        Commands::Wait { timeout_sec } => handle_wait(&ctx, timeout_sec),
        Commands::Ps { service } => handle_ps(&ctx, service),
        Commands::Services => handle_services(&ctx),
        Commands::Port {
            target,
            port,
            container,
        } => handle_port(&ctx, &target, port, container),
        Commands::Address { target, container } => handle_address(&ctx, &target, container),
        Commands::Logs { name, dir } => handle_logs(&ctx, name, dir),
        Commands::Doctor { strict } => handle_doctor(&ctx, strict),
        Commands::Config { command } => handle_config(&ctx, command),
    });

    if let Err(err) = result {
        if json_mode {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("TESTBED_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_context(cli: &Cli) -> Result<Context, TestbedError> {
    Ok(Context {
        config_path: resolve_config_path(cli.config.as_ref()),
        json: cli.json,
        files: cli.files.clone(),
        project: cli.project.clone(),
        project_directory: cli.project_directory.clone(),
        env: parse_env_pairs(&cli.env)?,
    })
}

fn parse_env_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>, TestbedError> {
    let mut envs = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            TestbedError::Config(format!("invalid --env '{pair}', expected KEY=VALUE"))
        })?;
        if key.trim().is_empty() {
            return Err(TestbedError::Config(format!(
                "invalid --env '{pair}', key must be non-empty"
            )));
        }
        envs.insert(key.to_string(), value.to_string());
    }
    Ok(envs)
}

fn resolve_manifests(ctx: &Context, cfg: &Config) -> Result<Vec<PathBuf>, TestbedError> {
    let configured: Vec<PathBuf> = if !ctx.files.is_empty() {
        ctx.files.clone()
    } else {
        cfg.compose
            .files
            .iter()
            .map(|file| PathBuf::from(expand_path(file)))
            .collect()
    };
    if configured.is_empty() {
        return Err(TestbedError::Config(
            "no manifests given; pass -f or set compose.files".to_string(),
        ));
    }
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut manifests = Vec::with_capacity(configured.len());
    for path in configured {
        let resolved = if path.is_absolute() {
            path
        } else {
            cwd.join(path)
        };
        if !resolved.exists() {
            return Err(TestbedError::Config(format!(
                "missing compose file: {}",
                resolved.display()
            )));
        }
        manifests.push(resolved);
    }
    Ok(manifests)
}

fn build_descriptor(ctx: &Context, cfg: &Config) -> Result<EnvironmentDescriptor, TestbedError> {
    let project = ctx
        .project
        .clone()
        .unwrap_or_else(|| cfg.compose.project.clone());
    if project.trim().is_empty() {
        return Err(TestbedError::Config(
            "missing project name; pass -p or set compose.project".to_string(),
        ));
    }
    let working_directory = match &ctx.project_directory {
        Some(dir) => dir.clone(),
        None => env::current_dir()?,
    };
    let mut descriptor = EnvironmentDescriptor::new(project, working_directory)
        .manifests(resolve_manifests(ctx, cfg)?);
    for (key, value) in &ctx.env {
        descriptor = descriptor.env(key, value);
    }
    descriptor.validate()?;
    Ok(descriptor)
}

fn with_environment<T>(
    ctx: &Context,
    action: impl FnOnce(&Environment<'_>, &Config) -> Result<T, TestbedError>,
) -> Result<T, TestbedError> {
    let cfg = load_config(&ctx.config_path)?;
    let descriptor = build_descriptor(ctx, &cfg)?;
    let environment = Environment::new(&descriptor).with_settings(cfg.settings());
    action(&environment, &cfg)
}

fn handle_up(ctx: &Context, timeout_sec: Option<u64>) -> Result<(), TestbedError> {
    with_environment(ctx, |environment, cfg| {
        let timeout = timeout_sec
            .map(Duration::from_secs)
            .unwrap_or_else(|| cfg.up_timeout());
        let project = environment.descriptor().namespace();
        if !environment.up(timeout) {
            return Err(TestbedError::Process(format!(
                "environment '{}' did not come up healthy within {}s; rerun with --verbose for the failing command",
                project,
                timeout.as_secs()
            )));
        }
        output(
            ctx,
            json!({
                "action": "up",
                "project": project,
                "containers": environment.project_container_ids(),
            }),
        )
    })
}

fn handle_down(ctx: &Context) -> Result<(), TestbedError> {
    with_environment(ctx, |environment, _| {
        let project = environment.descriptor().namespace();
        if !environment.down() {
            return Err(TestbedError::Process(format!(
                "environment '{project}' was not fully taken down; try `testbed cleanup`"
            )));
        }
        output(ctx, json!({"action": "down", "project": project}))
    })
}

fn handle_cleanup(ctx: &Context) -> Result<(), TestbedError> {
    with_environment(ctx, |environment, _| {
        let project = environment.descriptor().namespace();
        if !environment.clean_up() {
            return Err(TestbedError::Process(format!(
                "cleanup of '{project}' left resources behind"
            )));
        }
        output(ctx, json!({"action": "cleanup", "project": project}))
    })
}

fn handle_wait(ctx: &Context, timeout_sec: Option<u64>) -> Result<(), TestbedError> {
    with_environment(ctx, |environment, cfg| {
        let timeout = timeout_sec
            .map(Duration::from_secs)
            .unwrap_or_else(|| cfg.up_timeout());
        if !environment.wait_for_all_healthy(timeout) {
            return Err(TestbedError::Process(format!(
                "containers did not become healthy within {}s",
                timeout.as_secs()
            )));
        }
        output(ctx, json!({"action": "wait", "healthy": true}))
    })
}

fn handle_ps(ctx: &Context, service: Option<String>) -> Result<(), TestbedError> {
    with_environment(ctx, |environment, _| {
        let containers = match service.as_deref() {
            Some(service) => environment.service_container_ids(service),
            None => environment.project_container_ids(),
        };
        output(ctx, json!({"service": service, "containers": containers}))
    })
}

fn handle_services(ctx: &Context) -> Result<(), TestbedError> {
    with_environment(ctx, |environment, _| {
        output(ctx, json!({"services": environment.services()}))
    })
}

fn handle_port(ctx: &Context, target: &str, port: u16, container: bool) -> Result<(), TestbedError> {
    with_environment(ctx, |environment, _| {
        let mapped = if container {
            environment.container_mapped_port(target, port)
        } else {
            environment.service_mapped_port(target, port)
        };
        if mapped.is_empty() {
            return Err(TestbedError::Process(format!(
                "no host mapping for port {port} of '{target}'"
            )));
        }
        output(ctx, json!({"target": target, "port": port, "mapped_port": mapped}))
    })
}

fn handle_address(ctx: &Context, target: &str, container: bool) -> Result<(), TestbedError> {
    with_environment(ctx, |environment, _| {
        let addresses: Vec<String> = if container {
            environment
                .container_address(target)
                .into_iter()
                .map(|ip| ip.to_string())
                .collect()
        } else {
            environment
                .service_container_ips(target)
                .iter()
                .map(ToString::to_string)
                .collect()
        };
        if addresses.is_empty() {
            return Err(TestbedError::Process(format!(
                "no address found for '{target}'"
            )));
        }
        output(ctx, json!({"target": target, "addresses": addresses}))
    })
}

fn handle_logs(ctx: &Context, name: Option<String>, dir: Option<PathBuf>) -> Result<(), TestbedError> {
    with_environment(ctx, |environment, _| {
        let name = name.unwrap_or_else(|| {
            format!(
                "{}__{}",
                environment.descriptor().namespace(),
                Utc::now().format("%Y_%m_%d_%H_%M_%S")
            )
        });
        let target_dir = match dir {
            Some(dir) => dir,
            None => env::current_dir()?,
        };
        let archive = environment.dump_logs(&name, &target_dir)?;
        output(ctx, json!({"archive": archive}))
    })
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    id: String,
    ok: bool,
    message: String,
    remediation: String,
}

fn doctor_check(
    id: &str,
    ok: bool,
    message: impl Into<String>,
    remediation: impl Into<String>,
) -> DoctorCheck {
    DoctorCheck {
        id: id.to_string(),
        ok,
        message: message.into(),
        remediation: remediation.into(),
    }
}

fn collect_doctor_checks(cfg: &Config) -> Vec<DoctorCheck> {
    let settings = cfg.settings();
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut checks = Vec::new();

    let docker_program = &settings.toolchain.docker_program;
    let docker_installed = which::which(docker_program).is_ok();
    let docker_ok = docker_installed
        && run_status(
            &ProcessRunner,
            &Invocation::new(docker_program.as_str(), cwd.as_path()).arg("info"),
            settings.command_timeout,
        );
    checks.push(doctor_check(
        "docker_runtime",
        docker_ok,
        if docker_ok {
            format!("{docker_program} daemon reachable")
        } else if docker_installed {
            format!("{docker_program} is installed but the daemon is unreachable")
        } else {
            format!("{docker_program} is not installed or not in PATH")
        },
        "Install/start Docker (or a compatible runtime) and rerun `testbed doctor`.",
    ));

    let compose_program = &settings.toolchain.compose_program;
    let compose_installed = which::which(compose_program).is_ok();
    let compose_ok = compose_installed
        && run_status(
            &ProcessRunner,
            &Invocation::new(compose_program.as_str(), cwd.as_path())
                .args(settings.toolchain.compose_args.iter().cloned())
                .arg("version"),
            settings.command_timeout,
        );
    checks.push(doctor_check(
        "docker_compose",
        compose_ok,
        if compose_ok {
            "compose tool available"
        } else {
            "compose tool is unavailable"
        },
        "Install the Docker Compose plugin, or set compose.program/compose.args in the config.",
    ));

    checks
}

fn handle_doctor(ctx: &Context, strict: bool) -> Result<(), TestbedError> {
    let cfg = load_config(&ctx.config_path)?;
    let checks = collect_doctor_checks(&cfg);
    let ok = checks.iter().all(|check| check.ok);
    let primary_error = checks
        .iter()
        .find(|check| !check.ok)
        .map(|check| check.message.clone());

    if ctx.json {
        let payload = JsonResult {
            ok,
            result: Some(json!({ "checks": checks, "strict": strict })),
            error: primary_error,
        };
        print_json(&payload)?;
        if strict && !ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    for check in &checks {
        let state = if check.ok { "ok" } else { "fail" };
        println!("[{}] {} - {}", state, check.id, check.message);
        if !check.ok {
            println!("  remediation: {}", check.remediation);
        }
    }
    if ok || !strict {
        return Ok(());
    }
    Err(TestbedError::Process(
        primary_error.unwrap_or_else(|| "one or more readiness checks failed".to_string()),
    ))
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), TestbedError> {
    match command {
        ConfigCommand::Init => {
            if ctx.config_path.exists() {
                return output(ctx, json!({"path": ctx.config_path, "created": false}));
            }
            ensure_parent(&ctx.config_path)?;
            fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            output(ctx, json!({"path": ctx.config_path, "created": true}))
        }
        ConfigCommand::Show => {
            let cfg = load_config(&ctx.config_path)?;
            output(
                ctx,
                json!({
                    "path": ctx.config_path,
                    "exists": ctx.config_path.exists(),
                    "config": serde_json::to_value(&cfg)?,
                }),
            )
        }
        ConfigCommand::Validate => {
            let _cfg = read_config(&ctx.config_path).map_err(|err| {
                TestbedError::Config(format!(
                    "config is invalid. Please edit {} and try again. ({})",
                    display_path(&ctx.config_path),
                    err
                ))
            })?;
            output(ctx, json!({"path": ctx.config_path, "valid": true}))
        }
        ConfigCommand::Path => output(ctx, json!({"path": ctx.config_path})),
    }
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), TestbedError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), TestbedError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn context(dir: &Path) -> Context {
        Context {
            config_path: dir.join("config.yaml"),
            json: true,
            files: Vec::new(),
            project: None,
            project_directory: Some(dir.to_path_buf()),
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn env_pairs_parse_and_reject_malformed() {
        let envs = parse_env_pairs(&["A=1".to_string(), "B=x=y".to_string()]).unwrap();
        assert_eq!(envs.get("A").map(String::as_str), Some("1"));
        assert_eq!(envs.get("B").map(String::as_str), Some("x=y"));
        assert!(parse_env_pairs(&["NOEQUALS".to_string()]).is_err());
        assert!(parse_env_pairs(&["=value".to_string()]).is_err());
    }

    #[test]
    fn descriptor_uses_cli_over_config() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("compose.yml");
        fs::write(&manifest, "services: {}\n").unwrap();
        let mut ctx = context(dir.path());
        ctx.files = vec![manifest.clone()];
        ctx.project = Some("cli1".to_string());
        ctx.env.insert("TAG".to_string(), "v1".to_string());
        let mut cfg = Config::default();
        cfg.compose.project = "fromconfig".to_string();

        let descriptor = build_descriptor(&ctx, &cfg).unwrap();
        assert_eq!(descriptor.namespace(), "cli1");
        assert_eq!(descriptor.manifest_paths(), [manifest]);
        assert_eq!(
            descriptor.environment_variables().get("TAG").map(String::as_str),
            Some("v1")
        );
        assert_eq!(descriptor.working_directory(), dir.path());
    }

    #[test]
    fn descriptor_falls_back_to_config() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("base.yml");
        fs::write(&manifest, "services: {}\n").unwrap();
        let ctx = context(dir.path());
        let mut cfg = Config::default();
        cfg.compose.project = "fromconfig".to_string();
        cfg.compose.files = vec![manifest.to_string_lossy().to_string()];

        let descriptor = build_descriptor(&ctx, &cfg).unwrap();
        assert_eq!(descriptor.namespace(), "fromconfig");
        assert_eq!(descriptor.manifest_paths().len(), 1);
    }

    #[test]
    fn descriptor_requires_project_and_existing_manifests() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.files = vec![dir.path().join("missing.yml")];
        let err = build_descriptor(&ctx, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("missing project name"));

        ctx.project = Some("p1".to_string());
        let err = build_descriptor(&ctx, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("missing compose file"));

        ctx.files.clear();
        let err = build_descriptor(&ctx, &Config::default()).unwrap_err();
        assert!(err.to_string().contains("no manifests"));
    }
}
