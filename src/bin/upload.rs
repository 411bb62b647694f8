use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use rdtp::xfer::{self, ClientMode};
use rdtp::{cli, Endpoint, RecoveryMode};

/// Transfers a file from the client to the server.
#[derive(Debug, Parser)]
#[command(name = "upload")]
struct Args {
    /// Increase output verbosity.
    #[arg(short, long)]
    verbose: bool,

    /// Decrease output verbosity.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Server IP address.
    #[arg(short = 'H', long, default_value = cli::DEFAULT_HOST)]
    host: String,

    /// Server port.
    #[arg(short, long, default_value_t = cli::DEFAULT_PORT)]
    port: u16,

    /// Source file path.
    #[arg(short, long, value_parser = cli::parse_source_file)]
    src: PathBuf,

    /// File name under the server's storage directory.
    #[arg(short, long, value_parser = cli::parse_file_name)]
    name: String,

    /// Error recovery protocol.
    #[arg(
        short = 'r',
        long = "protocol",
        value_parser = cli::parse_mode,
        default_value = "GO_BACK_N"
    )]
    protocol: RecoveryMode,
}

fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_logging(args.verbose, args.quiet);

    info!(
        src = %args.src.display(),
        name = %args.name,
        "uploading to {}:{}",
        args.host,
        args.port
    );

    match run(&args) {
        Ok(()) => {
            info!(name = %args.name, "file uploaded");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "upload failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), rdtp::Error> {
    let mut endpoint = Endpoint::connect((args.host.as_str(), args.port), args.protocol)?;

    xfer::send_request(&mut endpoint, ClientMode::Upload, &args.name)?;
    xfer::send_file(&mut endpoint, &args.src)?;

    endpoint.close();
    Ok(())
}
