//! CLI argument parsing for the provisioning runner.
//!
//! The CLI only carries overrides; layering with the config file and the
//! environment happens in [`crate::config`].
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "erp-bootstrap",
    version,
    about = "Provision a tenant on an ERPNext-style server, then smoke-check it",
    after_help = "Commands:\n  run       Log in, execute the step catalog, then run checks\n  verify    Log in and run the read-only checks only\n  catalog   Print the effective step catalog as JSON (no network)\n\nExamples:\n  erp-bootstrap run --base-url http://localhost:8080 --password admin --company Acme\n  ERP_PASSWORD=admin erp-bootstrap verify --json\n  erp-bootstrap catalog --company Acme > steps.json\n  erp-bootstrap run --catalog steps.json --strict-existing",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Verify(VerifyArgs),
    Catalog(CatalogArgs),
}

/// Connection overrides shared by every command that talks to the server.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Server root, e.g. http://localhost:8080
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Login user
    #[arg(long, value_name = "USER")]
    pub username: Option<String>,

    /// Login password
    #[arg(long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Company name substituted for {company} in step payloads
    #[arg(long, value_name = "NAME")]
    pub company: Option<String>,

    /// JSON config file (defaults to the user config dir when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Per-request timeout; unset means wait indefinitely
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,
}

/// Overrides for the read-only checks.
#[derive(Args, Debug, Clone, Default)]
pub struct CheckArgs {
    /// Secondary app mount point probed after provisioning
    #[arg(long, value_name = "PATH")]
    pub mount: Option<String>,

    /// Country the first Company record is expected to carry
    #[arg(long, value_name = "COUNTRY", conflicts_with = "no_country_check")]
    pub expect_country: Option<String>,

    /// Skip the company country check
    #[arg(long)]
    pub no_country_check: bool,
}

/// Output flags shared by the networked commands.
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Emit the run summary as JSON instead of the transcript
    #[arg(long)]
    pub json: bool,

    /// Emit debug diagnostics on stderr
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Log in, execute the step catalog, then run checks")]
pub struct RunArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub checks: CheckArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// JSON step catalog to execute instead of the built-in one
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Count "already exists" responses as failures
    #[arg(long)]
    pub strict_existing: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Log in and run the read-only checks only")]
pub struct VerifyArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub checks: CheckArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Print the effective step catalog as JSON")]
pub struct CatalogArgs {
    /// Company name substituted for {company} in step payloads
    #[arg(long, value_name = "NAME")]
    pub company: Option<String>,

    /// JSON config file (defaults to the user config dir when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// JSON step catalog to render instead of the built-in one
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,
}
