use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use rdtp::xfer::{self, ClientMode};
use rdtp::{cli, Endpoint, RecoveryMode};

/// Downloads a file from the server to the client.
#[derive(Debug, Parser)]
#[command(name = "download")]
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

    /// Destination file path or directory.
    #[arg(short, long, value_parser = cli::parse_destination)]
    dst: PathBuf,

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
        name = %args.name,
        dst = %args.dst.display(),
        "downloading from {}:{}",
        args.host,
        args.port
    );

    match run(&args) {
        Ok(path) => {
            info!(path = %path.display(), "file downloaded");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "download failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<PathBuf, rdtp::Error> {
    let mut endpoint = Endpoint::connect((args.host.as_str(), args.port), args.protocol)?;

    xfer::send_request(&mut endpoint, ClientMode::Download, &args.name)?;
    let path = xfer::recv_file(&mut endpoint, &args.dst, &args.name)?;

    endpoint.close();
    Ok(path)
}
