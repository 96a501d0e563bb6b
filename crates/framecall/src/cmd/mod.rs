use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod host;
pub mod sign;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a demo host that answers framecall requests.
    Host(HostArgs),
    /// Make one call against a host.
    Call(CallArgs),
    /// Build or verify a signed request.
    Sign(SignArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Host(args) => host::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Sign(args) => sign::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Verify handshake signed requests with this secret. Without it any
    /// non-empty signed request is accepted.
    #[arg(long, env = "FRAMECALL_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Session token handed out by the handshake.
    #[arg(long, default_value = "demo-token")]
    pub token: String,
    /// Require this legacy consumer secret on every request.
    #[arg(long, hide_env_values = true, env = "FRAMECALL_CONSUMER_SECRET")]
    pub consumer_secret: Option<String>,
    /// Exit after serving N requests.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Remote method name (e.g. getLoggedInUser, ajax).
    pub method: String,
    /// Application id stamped on every envelope.
    #[arg(long, env = "FRAMECALL_APP_ID", default_value = "framecall-cli")]
    pub app_id: String,
    /// Call data as a JSON object.
    #[arg(long)]
    pub json: Option<String>,
    /// Authenticate with a prebuilt signed request.
    #[arg(
        long,
        env = "FRAMECALL_SIGNED_REQUEST",
        hide_env_values = true,
        conflicts_with_all = ["secret", "consumer_secret"]
    )]
    pub signed_request: Option<String>,
    /// Sign the --param values with this secret and authenticate with the result.
    #[arg(long, hide_env_values = true, conflicts_with = "consumer_secret")]
    pub secret: Option<String>,
    /// Signed request parameter (key=value), repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param, requires = "secret")]
    pub params: Vec<(String, String)>,
    /// Legacy mode: send this shared secret on every envelope instead of a handshake.
    #[arg(long, hide_env_values = true)]
    pub consumer_secret: Option<String>,
    /// Send without waiting for a reply.
    #[arg(long)]
    pub no_wait: bool,
    /// Maximum time for the handshake and for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Signing secret.
    #[arg(long, env = "FRAMECALL_SECRET", hide_env_values = true)]
    pub secret: String,
    /// Parameter to sign (key=value), repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
    /// Verify this signed request instead of building one.
    #[arg(long, value_name = "QUERY", conflicts_with = "params")]
    pub verify: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a `key=value` argument.
pub fn parse_param(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{input}'")),
    }
}

/// Parse durations like `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
