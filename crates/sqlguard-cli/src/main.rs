use clap::{Parser, Subcommand, ValueEnum};
use sqlguard_core::AccessMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "sqlguard", version, about = "Access-mode SQL gateway and injection assessment")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the injection corpus under both access modes and print the security report.
    ///
    /// Creates and drops a test table in the target database. Exits with status 1 when the
    /// overall score is below the pass threshold.
    Assess {
        /// Critical and high severity cases only.
        #[arg(long, default_value_t = false)]
        quick: bool,

        /// YAML configuration file.
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Target database URL. Overrides the configuration file.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,

        /// Report format.
        #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
        format: ReportFormat,

        /// Also write the JSON report to this file.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Run one statement through the gateway and executor and print the rows as JSON.
    Exec {
        /// Access mode for this call.
        #[arg(long, default_value = "restricted")]
        mode: AccessMode,

        /// SQL text. Use `$1..$n` for parameters.
        sql: String,

        /// Parameter value as a JSON scalar, bound in order. Repeatable.
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,

        /// YAML configuration file.
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Target database URL. Overrides the configuration file.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },

    /// Print the gateway's classification and decision for SQL text without connecting.
    Classify {
        /// SQL text.
        sql: String,

        /// Access mode to decide under.
        #[arg(long, default_value = "restricted")]
        mode: AccessMode,

        /// YAML configuration file.
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Json,
    Text,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.cmd {
        Command::Assess {
            quick,
            config,
            database_url,
            format,
            output,
        } => {
            let passed = commands::assess::run(
                config.as_deref(),
                database_url,
                quick,
                format,
                output.as_deref(),
            )
            .await?;
            if !passed {
                std::process::exit(1);
            }
        }

        Command::Exec {
            mode,
            sql,
            params,
            config,
            database_url,
        } => commands::exec::run(config.as_deref(), database_url, mode, &sql, &params).await?,

        Command::Classify { sql, mode, config } => {
            commands::classify::run(config.as_deref(), &sql, mode)?
        }
    }

    Ok(())
}
