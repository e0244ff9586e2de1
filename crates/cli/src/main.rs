use crate::{
    commands::{Commands, ContextArgs, RemoteRunArgs},
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use engine_core::tasks::{NetworkConfig, TaskDefinitionSpec};
use engine_runtime::{
    config::{EngineConfig, ParamScope},
    factory::Services,
    pipeline::{
        extract::{ExtractRequest, ExtractionPipeline},
        listing::list_objects,
        load::{LoadPipeline, LoadRequest},
        remote::RemoteExecutionPipeline,
    },
};
use model::{
    execution::{context::QueryContext, timestamp::ExecutionTs},
    storage::object_key::ObjectKey,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod env;
mod error;
mod output;
mod shutdown;

const DEFAULT_CONFIG: &str = "sluice.toml";

#[derive(Parser)]
#[command(name = "sluice", version, about = "Batch extract and load engine")]
struct Cli {
    #[arg(long, global = true, help = "Config file path (default: $SLUICE_CONFIG or ./sluice.toml)")]
    config: Option<String>,

    #[arg(long, global = true, help = "Load extra environment variables from this .env file")]
    env_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let code = match run(cli, shutdown.cancel_token()).await {
        Ok(()) => ExitCode::Success,
        Err(err) if err.is_cancelled() || shutdown.is_shutdown_requested() => {
            warn!(%err, "Stopped after shutdown request");
            ExitCode::ShutdownRequested
        }
        Err(err) => {
            error!(%err, "sluice failed");
            ExitCode::GeneralError
        }
    };

    std::process::exit(code.as_i32());
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), CliError> {
    let mut env = EnvManager::new();
    if let Some(path) = &cli.env_file {
        env.load_from_file(path)?;
    }
    let config = load_config(cli.config.as_deref(), &env).await?;

    match cli.command {
        Commands::Extract {
            db_conn_secret_name,
            db_schema,
            db_source,
            template_file,
            path,
            aws_target_bucket,
            aws_ingest_prefix,
            execution_ts,
            context,
            output: report_path,
        } => {
            let ts = ExecutionTs::parse(&execution_ts)?;
            let mut vars = layered_context(&config, &env, &context, "extract")?;
            vars.merge(
                QueryContext::for_execution(&ts, None)
                    .with("schema", db_schema.as_str())
                    .with("source", db_source.as_str()),
            );
            vars.merge(extra_vars(&context));

            let request = ExtractRequest {
                secret_name: db_conn_secret_name,
                template: template_file,
                context: vars,
                key: ObjectKey::partitioned(&aws_ingest_prefix, &db_schema, &db_source, &ts),
            };

            let services = Services::new(config).await;
            let pipeline = ExtractionPipeline::new(
                services.broker()?,
                services.renderer(path.map(PathBuf::from)),
                services.sink(&aws_target_bucket)?,
            );
            let report = pipeline.run(&request, &cancel).await?;
            output::emit(&report, report_path.as_deref()).await?;
        }
        Commands::ExtractSql {
            sql_file,
            path,
            target_key_prefix,
            db_conn_secret_name,
            aws_target_bucket,
            load_date,
            context,
            output: report_path,
        } => {
            let date = parse_load_date(load_date.as_deref())?;
            let mut vars = layered_context(&config, &env, &context, "extract-sql")?;
            vars.merge(extra_vars(&context));

            let bucket = match aws_target_bucket {
                Some(bucket) => bucket,
                None => vars
                    .get("aws_target_bucket")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        CliError::Config(
                            "--aws-target-bucket is required when no `aws_target_bucket` parameter is set"
                                .into(),
                        )
                    })?,
            };

            let request = ExtractRequest {
                key: ObjectKey::dated(&target_key_prefix, &db_conn_secret_name, date),
                secret_name: db_conn_secret_name,
                template: sql_file,
                context: vars,
            };

            let services = Services::new(config).await;
            let pipeline = ExtractionPipeline::new(
                services.broker()?,
                services.renderer(path.map(PathBuf::from)),
                services.sink(&bucket)?,
            );
            let report = pipeline.run(&request, &cancel).await?;
            output::emit(&report, report_path.as_deref()).await?;
        }
        Commands::Load {
            source_secret_name,
            template_file,
            path,
            target_secret_name,
            target_table,
            truncate,
            execution_ts,
            context,
            output: report_path,
        } => {
            let ts = parse_execution_ts(execution_ts.as_deref())?;
            let mut vars = layered_context(&config, &env, &context, "load")?;
            vars.merge(QueryContext::for_execution(&ts, None));
            vars.merge(extra_vars(&context));

            let request = LoadRequest {
                source_secret: source_secret_name,
                template: template_file,
                context: vars,
                target_secret: target_secret_name,
                target_table,
                truncate,
            };

            let services = Services::new(config).await;
            let pipeline = LoadPipeline::new(
                services.broker()?,
                services.renderer(path.map(PathBuf::from)),
            );
            let report = pipeline.run(&request, &cancel).await?;
            output::emit(&report, report_path.as_deref()).await?;
        }
        Commands::RemoteRun(args) => {
            let (spec, network) = task_request(&config, &args);
            let report_path = args.output.clone();

            let services = Services::new(config).await;
            let pipeline = RemoteExecutionPipeline::new(services.task_manager()?);
            let report = pipeline.run(&spec, &network, &cancel).await?;
            output::emit(&report, report_path.as_deref()).await?;
        }
        Commands::ListObjects {
            aws_target_bucket,
            prefix,
        } => {
            let services = Services::new(config).await;
            let store = services.object_store(&aws_target_bucket)?;
            let objects = list_objects(store.as_ref(), &prefix).await?;
            info!(bucket = %aws_target_bucket, prefix = %prefix, count = objects.len(), "Listed objects");
            output::emit(&objects, None).await?;
        }
        Commands::Config => {
            let effective = serde_json::json!({
                "config": config,
                "env": env.redacted(),
            });
            output::emit(&effective, None).await?;
        }
    }

    Ok(())
}

async fn load_config(explicit: Option<&str>, env: &EnvManager) -> Result<EngineConfig, CliError> {
    let path = explicit.or_else(|| env.get("SLUICE_CONFIG"));
    match path {
        Some(path) => {
            info!(path, "Loading configuration");
            Ok(EngineConfig::load(path).await?)
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            info!(path = DEFAULT_CONFIG, "Loading configuration");
            Ok(EngineConfig::load(DEFAULT_CONFIG).await?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn parse_execution_ts(raw: Option<&str>) -> Result<ExecutionTs, CliError> {
    match raw {
        Some(raw) => Ok(ExecutionTs::parse(raw)?),
        None => {
            let ts = ExecutionTs::now();
            warn!(execution_ts = %ts, "No --execution-ts given, using the current time");
            Ok(ts)
        }
    }
}

fn parse_load_date(raw: Option<&str>) -> Result<NaiveDate, CliError> {
    match raw {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| CliError::LoadDate(raw.to_string())),
        None => Ok(Utc::now().date_naive()),
    }
}

/// Parameter layers from the config, as the lowest-precedence template
/// variables. `dag_name` is the subcommand.
fn layered_context(
    config: &EngineConfig,
    env: &EnvManager,
    args: &ContextArgs,
    dag_name: &str,
) -> Result<QueryContext, CliError> {
    let app_env = env.get("APP_ENV").unwrap_or("local");
    let params = config.layered_params(
        &args.layers,
        ParamScope {
            app_env,
            dag_name,
            version: env!("CARGO_PKG_VERSION"),
        },
    )?;

    let mut context = QueryContext::new();
    for (key, value) in params {
        context.insert(key, value);
    }
    Ok(context)
}

fn extra_vars(args: &ContextArgs) -> QueryContext {
    let mut context = QueryContext::new();
    for (key, value) in &args.vars {
        context.insert(key.clone(), value.clone());
    }
    context
}

/// Command-line values win over the `[tasks]` defaults.
fn task_request(config: &EngineConfig, args: &RemoteRunArgs) -> (TaskDefinitionSpec, NetworkConfig) {
    let tasks = &config.tasks;
    let pick = |arg: &Option<String>, default: &String| arg.clone().unwrap_or_else(|| default.clone());

    let spec = TaskDefinitionSpec {
        family: args.family.clone(),
        task_role_arn: pick(&args.task_role_arn, &tasks.task_role_arn),
        execution_role_arn: pick(&args.execution_role_arn, &tasks.execution_role_arn),
        container_name: args.container_name.clone(),
        image: args.image.clone(),
        command: args.command.clone(),
        log_group: pick(&args.log_group, &tasks.log_group),
        log_stream_prefix: pick(&args.log_stream_prefix, &tasks.log_stream_prefix),
        cpu: pick(&args.cpu, &tasks.cpu),
        memory: pick(&args.memory, &tasks.memory),
    };

    let mut network = tasks.network();
    if !args.subnets.is_empty() {
        network.subnets = args.subnets.clone();
    }
    if !args.security_groups.is_empty() {
        network.security_groups = args.security_groups.clone();
    }
    network.assign_public_ip |= args.assign_public_ip;

    (spec, network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_requires_execution_ts() {
        let base = [
            "sluice",
            "extract",
            "--db-conn-secret-name",
            "warehouse/source",
            "--db-schema",
            "dbo",
            "--db-source",
            "customers",
            "--template-file",
            "customers.sql",
            "--aws-target-bucket",
            "lake",
            "--aws-ingest-prefix",
            "raw",
        ];
        assert!(Cli::try_parse_from(base).is_err());

        let cli = Cli::try_parse_from(base.into_iter().chain(["--execution-ts", "2024-03-05"]))
            .unwrap();
        match cli.command {
            Commands::Extract { execution_ts, .. } => assert_eq!(execution_ts, "2024-03-05"),
            _ => panic!("expected extract"),
        }
    }

    fn remote_args() -> RemoteRunArgs {
        RemoteRunArgs {
            family: "sluice-extract".into(),
            image: "sluice:1".into(),
            command: "sluice extract".into(),
            container_name: "sluice".into(),
            task_role_arn: None,
            execution_role_arn: Some("arn:exec:override".into()),
            log_group: None,
            log_stream_prefix: None,
            cpu: None,
            memory: Some("4096".into()),
            subnets: vec![],
            security_groups: vec!["sg-cli".into()],
            assign_public_ip: false,
            output: None,
        }
    }

    #[test]
    fn test_task_request_prefers_cli_values() {
        let mut config = EngineConfig::default();
        config.tasks.task_role_arn = "arn:task:config".into();
        config.tasks.execution_role_arn = "arn:exec:config".into();
        config.tasks.subnets = vec!["subnet-config".into()];
        config.tasks.security_groups = vec!["sg-config".into()];

        let (spec, network) = task_request(&config, &remote_args());
        assert_eq!(spec.task_role_arn, "arn:task:config");
        assert_eq!(spec.execution_role_arn, "arn:exec:override");
        assert_eq!(spec.cpu, "1024");
        assert_eq!(spec.memory, "4096");
        assert_eq!(network.subnets, vec!["subnet-config".to_string()]);
        assert_eq!(network.security_groups, vec!["sg-cli".to_string()]);
    }

    #[test]
    fn test_load_date_parsing() {
        assert_eq!(
            parse_load_date(Some("2024-02-29")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(matches!(parse_load_date(Some("29/02/2024")), Err(CliError::LoadDate(_))));
    }

    #[test]
    fn test_cli_vars_override_params() {
        let config = EngineConfig::from_toml_str(
            "[params.global]\nregion = \"eu-{dag_name}\"\nlimit = 5\n",
            Path::new("sluice.toml"),
        )
        .unwrap();

        let args = ContextArgs {
            vars: vec![("limit".into(), "10".into())],
            layers: vec![],
        };
        let env = EnvManager::default();
        let mut context = layered_context(&config, &env, &args, "extract").unwrap();
        assert_eq!(context.get("limit"), Some(&serde_json::Value::from(5)));
        assert_eq!(context.get("region"), Some(&serde_json::Value::from("eu-extract")));

        context.merge(extra_vars(&args));
        assert_eq!(context.get("limit"), Some(&serde_json::Value::from("10")));
    }
}
