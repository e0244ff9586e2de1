use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum Commands {
    /// Run a templated query and write the result to a partitioned object
    Extract {
        #[arg(long, help = "Secret holding the source connection parameters")]
        db_conn_secret_name: String,

        #[arg(long, help = "Source schema, used in the object key and template context")]
        db_schema: String,

        #[arg(long, help = "Source table or view, used in the object key and template context")]
        db_source: String,

        #[arg(long, help = "Query template, relative to --path")]
        template_file: String,

        #[arg(long, help = "Template search root; defaults to templates.root from the config")]
        path: Option<String>,

        #[arg(long)]
        aws_target_bucket: String,

        #[arg(long)]
        aws_ingest_prefix: String,

        #[arg(
            long,
            help = "Execution timestamp (RFC 3339, YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD); it names the object key, so a rerun overwrites the same object"
        )]
        execution_ts: String,

        #[command(flatten)]
        context: ContextArgs,

        #[arg(long, help = "If specified, writes the JSON report to this file instead of stdout")]
        output: Option<String>,
    },

    /// Run a SQL file and write the result to `{prefix}/{secret}_{load_date}.csv.gz`
    ExtractSql {
        #[arg(long, help = "SQL template, relative to --path")]
        sql_file: String,

        #[arg(long)]
        path: Option<String>,

        #[arg(long)]
        target_key_prefix: String,

        #[arg(long)]
        db_conn_secret_name: String,

        #[arg(
            long,
            help = "Target bucket; falls back to the `aws_target_bucket` parameter"
        )]
        aws_target_bucket: Option<String>,

        #[arg(long, help = "Load date (YYYY-MM-DD); defaults to today")]
        load_date: Option<String>,

        #[command(flatten)]
        context: ContextArgs,

        #[arg(long)]
        output: Option<String>,
    },

    /// Query one database and bulk-load the result into a table of another
    Load {
        #[arg(long)]
        source_secret_name: String,

        #[arg(long)]
        template_file: String,

        #[arg(long)]
        path: Option<String>,

        #[arg(long)]
        target_secret_name: String,

        #[arg(long)]
        target_table: String,

        #[arg(long, help = "Delete every row of the target table before loading")]
        truncate: bool,

        #[arg(long, help = "Execution timestamp for the template context; defaults to now")]
        execution_ts: Option<String>,

        #[command(flatten)]
        context: ContextArgs,

        #[arg(long)]
        output: Option<String>,
    },

    /// Register a task definition, launch it and wait for it to stop
    RemoteRun(RemoteRunArgs),

    /// List the non-empty objects under a prefix
    ListObjects {
        #[arg(long)]
        aws_target_bucket: String,

        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Print the effective configuration and environment, secrets redacted
    Config,
}

/// Template variables layered on top of the execution variables.
#[derive(Args, Debug, Default, Clone)]
pub struct ContextArgs {
    #[arg(
        long = "var",
        value_name = "KEY=VALUE",
        value_parser = parse_var,
        help = "Extra template variable; may be repeated"
    )]
    pub vars: Vec<(String, String)>,

    #[arg(
        long = "layer",
        value_name = "NAME",
        help = "Parameter layer merged over `global`; may be repeated, last wins"
    )]
    pub layers: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RemoteRunArgs {
    #[arg(long)]
    pub family: String,

    #[arg(long)]
    pub image: String,

    #[arg(long, help = "Shell command run with `sh -c` in the container")]
    pub command: String,

    #[arg(long)]
    pub container_name: String,

    #[arg(long, help = "Defaults to tasks.task_role_arn")]
    pub task_role_arn: Option<String>,

    #[arg(long, help = "Defaults to tasks.execution_role_arn")]
    pub execution_role_arn: Option<String>,

    #[arg(long)]
    pub log_group: Option<String>,

    #[arg(long)]
    pub log_stream_prefix: Option<String>,

    #[arg(long)]
    pub cpu: Option<String>,

    #[arg(long)]
    pub memory: Option<String>,

    #[arg(long = "subnet", help = "May be repeated; defaults to tasks.subnets")]
    pub subnets: Vec<String>,

    #[arg(long = "security-group", help = "May be repeated; defaults to tasks.security_groups")]
    pub security_groups: Vec<String>,

    #[arg(long)]
    pub assign_public_ip: bool,

    #[arg(long)]
    pub output: Option<String>,
}

pub fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
