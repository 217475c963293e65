use clap::Parser;
use incr_serve::file::File as ServedFile;
use incr_serve::Server;
use std::fs::OpenOptions;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "incr-serve", version = "1.0.0", about = "Host-side server for the incremental file-delivery protocol")]
struct Cli {
    /// TCP address to accept one connection on, e.g. 0.0.0.0:9000
    #[arg(long, conflicts_with = "stdio")]
    listen: Option<String>,

    /// Multiplex the protocol over stdin/stdout instead of a TCP socket
    #[arg(long)]
    stdio: bool,

    /// Where interleaved client log text is written; defaults to stderr
    #[arg(long)]
    log_sink: Option<PathBuf>,

    /// Ordered list of files to serve; file_id is the position in this list
    #[arg(required = true, num_args = 1..)]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let served = match open_files(&cli.files) {
        Ok(served) => served,
        Err(e) => {
            log::error!("incr-serve: failed to open input files: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_sink: Box<dyn std::io::Write> = match &cli.log_sink {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Box::new(f),
            Err(e) => {
                log::error!("incr-serve: failed to open log sink {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Box::new(std::io::stderr()),
    };

    let server = Server::new(served);

    let ok = if cli.stdio {
        // A duplex stdio connection: reads from stdin, writes to stdout.
        server.serve(StdioConnection, log_sink)
    } else {
        let addr = match &cli.listen {
            Some(addr) => addr.clone(),
            None => {
                log::error!("incr-serve: one of --listen or --stdio is required");
                return ExitCode::FAILURE;
            }
        };
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                log::error!("incr-serve: failed to bind {addr}: {e}");
                return ExitCode::FAILURE;
            }
        };
        log::info!("incr-serve: listening on {addr}");
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("incr-serve: accept failed: {e}");
                return ExitCode::FAILURE;
            }
        };
        log::info!("incr-serve: accepted connection from {peer}");
        server.serve(stream, log_sink)
    };

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn open_files(paths: &[PathBuf]) -> std::io::Result<Vec<ServedFile<std::fs::File>>> {
    paths
        .iter()
        .enumerate()
        .map(|(idx, path)| {
            let handle = std::fs::File::open(path)?;
            let size = handle.metadata()?.len();
            Ok(ServedFile::new(idx as i16, path.display().to_string(), size, handle))
        })
        .collect()
}

/// Wraps stdin/stdout as a single [`incr_serve::Connection`]. There is no
/// real read timeout on pipes, so `set_read_timeout` is a no-op — the
/// `--stdio` path is for local smoke-testing, not the production socket
/// case.
struct StdioConnection;

impl std::io::Read for StdioConnection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::stdin().read(buf)
    }
}

impl std::io::Write for StdioConnection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stdout().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}

impl incr_serve::Connection for StdioConnection {
    fn set_read_timeout(&mut self, _dur: Option<std::time::Duration>) -> std::io::Result<()> {
        Ok(())
    }
}
