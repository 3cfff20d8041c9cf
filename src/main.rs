//! Binary entry point for the vstorage provisioner CLI.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use vstorage_provisioner::{
    AccessMode, ClaimSpec, ConfigError, DeleteOutcome, ProductionProvisioner, ProvisionError,
    ProvisionRequest, ProvisionerConfig, ReclaimPolicy, VolumeHandle,
};

mod cli;

use cli::{Cli, DeleteCommand, ProvisionCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("handle {path}: {message}")]
    Handle { path: String, message: String },
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = ProvisionerConfig::load_without_cli_args()?;
    config.validate()?;
    let engine = ProductionProvisioner::from_config(&config);

    match cli {
        Cli::Provision(args) => {
            let request = build_request(args)?;
            let handle = engine.provision(&request).await?;
            let rendered = serde_json::to_string_pretty(&handle).map_err(|err| {
                CliError::Handle {
                    path: String::from("<stdout>"),
                    message: err.to_string(),
                }
            })?;
            writeln!(io::stdout(), "{rendered}").ok();
            Ok(())
        }
        Cli::Delete(args) => {
            let handle = read_handle(&args)?;
            match engine.delete(&handle).await {
                Ok(outcome) => {
                    writeln!(io::stdout(), "{}", describe(outcome, &handle)).ok();
                    Ok(())
                }
                Err(err) if err.is_ignorable() => {
                    writeln!(io::stderr(), "skipping {}: {err}", handle.name).ok();
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}

fn build_request(args: ProvisionCommand) -> Result<ProvisionRequest, CliError> {
    let access_modes = args
        .access_modes
        .iter()
        .map(|raw| raw.parse::<AccessMode>().map_err(CliError::Argument))
        .collect::<Result<Vec<_>, _>>()?;
    let reclaim_policy = args
        .reclaim_policy
        .parse::<ReclaimPolicy>()
        .map_err(CliError::Argument)?;
    let parameters = parse_parameters(&args.parameters)?;

    Ok(ProvisionRequest {
        pv_name: args.name,
        claim: ClaimSpec {
            uid: args
                .claim_uid
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            namespace: args.namespace,
            requested_size: args.size,
            access_modes,
            selector: None,
        },
        parameters,
        reclaim_policy,
    })
}

fn parse_parameters(raw: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_owned(), value.to_owned()))
            }
            _ => Err(CliError::Argument(format!(
                "parameter {pair:?} must look like KEY=VALUE"
            ))),
        })
        .collect()
}

fn read_handle(args: &DeleteCommand) -> Result<VolumeHandle, CliError> {
    let failure = |message: String| CliError::Handle {
        path: args.handle.clone(),
        message,
    };
    let path = Utf8Path::new(&args.handle);
    let file_name = path
        .file_name()
        .ok_or_else(|| failure(String::from("not a file path")))?;
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let contents = Dir::open_ambient_dir(parent, ambient_authority())
        .and_then(|dir| dir.read_to_string(file_name))
        .map_err(|err| failure(err.to_string()))?;
    serde_json::from_str(&contents).map_err(|err| failure(err.to_string()))
}

fn describe(outcome: DeleteOutcome, handle: &VolumeHandle) -> String {
    match outcome {
        DeleteOutcome::Deleted => format!("deleted {}", handle.name),
        DeleteOutcome::AlreadyAbsent => format!("{} was already absent", handle.name),
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
