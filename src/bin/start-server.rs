use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use tracing::{error, info, warn};

use rdtp::xfer::{self, ClientMode};
use rdtp::{cli, Endpoint};

/// Starts the server for file transfers.
#[derive(Debug, Parser)]
#[command(name = "start-server")]
struct Args {
    /// Increase output verbosity.
    #[arg(short, long)]
    verbose: bool,

    /// Decrease output verbosity.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Service IP address.
    #[arg(short = 'H', long, default_value = cli::DEFAULT_HOST)]
    host: String,

    /// Service port.
    #[arg(short, long, default_value_t = cli::DEFAULT_PORT)]
    port: u16,

    /// Storage directory path.
    #[arg(short, long, value_parser = cli::parse_storage_dir)]
    storage: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_logging(args.verbose, args.quiet);

    info!(
        storage = %args.storage.display(),
        "serving on {}:{}",
        args.host,
        args.port
    );

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "server failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), rdtp::Error> {
    let mut listener = Endpoint::bind((args.host.as_str(), args.port))?;
    listener.listen(0);

    loop {
        let mut endpoint = listener.accept()?;
        let storage = args.storage.clone();

        thread::spawn(move || {
            if let Err(err) = handle_client(&mut endpoint, &storage) {
                error!(%err, "client handler failed");
            }
            endpoint.close();
        });
    }
}

fn handle_client(endpoint: &mut Endpoint, storage: &Path) -> Result<(), rdtp::Error> {
    let (mode, name) = xfer::recv_request(endpoint)?;

    match mode {
        ClientMode::Upload => {
            let path = xfer::recv_file(endpoint, storage, &name)?;
            info!(path = %path.display(), "upload finished");
        }
        ClientMode::Download => {
            let path = storage.join(&name);
            if path.is_file() {
                xfer::send_file(endpoint, &path)?;
                info!(path = %path.display(), "download finished");
            } else {
                warn!(%name, "requested file does not exist");
                xfer::send_not_found(endpoint)?;
            }
        }
    }

    Ok(())
}
