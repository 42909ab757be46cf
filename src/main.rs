//! tcpmux - A multi-tenant, multi-threaded TCP relay

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::FmtSubscriber;

use tcpmux::config::{parse_relay_list, Config, RelayTuple};
use tcpmux::error::{Error, Result};
use tcpmux::net::parse_addr;
use tcpmux::pool::{Pool, Registry};

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging before touching any socket; the guard keeps the
    // file writer alive for the life of the process.
    let _guard = init_logging(args.verbose, args.file.as_deref());

    let config = args.into_config()?;

    info!("tcpmux v{} starting", env!("CARGO_PKG_VERSION"));
    for tuple in &config.tuples {
        info!(
            listen = %tuple.listen,
            src = ?tuple.src,
            dst = %tuple.dst,
            "Parsed relay tuple"
        );
    }

    let registry = Registry::install(&config.tuples)?;
    let pool = Pool::build(config.workers, registry);
    info!(workers = pool.size(), "Serving");

    pool.run()
}

fn init_logging(verbose: bool, file: Option<&Path>) -> Option<WorkerGuard> {
    let level = if verbose { Level::TRACE } else { Level::INFO };

    match file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().unwrap_or_else(|| OsStr::new("tcpmux.log"));
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));

            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");
            Some(guard)
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");
            None
        }
    }
}

/// Command line arguments
struct Args {
    listen: Option<String>,
    dst: Option<String>,
    src: Option<String>,
    relay_list: Vec<String>,
    file: Option<PathBuf>,
    workers: Option<usize>,
    verbose: bool,
}

impl Args {
    fn parse() -> Self {
        let argv: Vec<String> = std::env::args().collect();
        let mut listen = None;
        let mut dst = None;
        let mut src = None;
        let mut relay_list = Vec::new();
        let mut file = None;
        let mut workers = None;
        let mut verbose = false;

        let mut i = 1;
        while i < argv.len() {
            match argv[i].as_str() {
                "-l" | "--listen" => {
                    if i + 1 < argv.len() {
                        listen = Some(argv[i + 1].clone());
                        i += 1;
                    }
                }
                "-d" | "--dst" => {
                    if i + 1 < argv.len() {
                        dst = Some(argv[i + 1].clone());
                        i += 1;
                    }
                }
                "-s" | "--src" => {
                    if i + 1 < argv.len() {
                        src = Some(argv[i + 1].clone());
                        i += 1;
                    }
                }
                "-r" | "--relay_list" => {
                    if i + 1 < argv.len() {
                        relay_list.push(argv[i + 1].clone());
                        i += 1;
                    }
                }
                "-f" | "--file" => {
                    if i + 1 < argv.len() {
                        file = Some(PathBuf::from(&argv[i + 1]));
                        i += 1;
                    }
                }
                "-w" | "--workers" => {
                    if i + 1 < argv.len() {
                        workers = argv[i + 1].parse().ok();
                        i += 1;
                    }
                }
                "-V" | "--verbose" => verbose = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {}
            }
            i += 1;
        }

        Self {
            listen,
            dst,
            src,
            relay_list,
            file,
            workers,
            verbose,
        }
    }

    /// Assemble and validate the relay configuration. Any violation here
    /// exits the process before a single socket is created.
    fn into_config(self) -> Result<Config> {
        let mut tuples = Vec::new();

        if let Some(listen) = &self.listen {
            let dst = self
                .dst
                .as_ref()
                .ok_or_else(|| Error::Config("--listen requires --dst".to_string()))?;
            let src = match &self.src {
                Some(src) => Some(parse_addr(src)?),
                None => None,
            };
            tuples.push(RelayTuple::new(parse_addr(listen)?, src, parse_addr(dst)?));
        }

        for list in &self.relay_list {
            tuples.extend(parse_relay_list(list)?);
        }

        let config = Config {
            tuples,
            workers: self.workers.unwrap_or_else(num_cpus::get),
            log_file: self.file,
            verbose: self.verbose,
        };
        config.validate()?;
        Ok(config)
    }
}

fn print_help() {
    println!(
        r#"tcpmux - A multi-tenant TCP relay

USAGE:
    tcpmux [OPTIONS]

OPTIONS:
    -l, --listen <ADDR>      Listen address or port
    -d, --dst <ADDR>         Destination address
    -s, --src <ADDR>         Source address for outbound connections
    -r, --relay_list <LIST>  Relay tuples: listen,src,dst/... or listen,dst/...
    -f, --file <PATH>        Rotating log file path (stderr if omitted)
    -w, --workers <N>        I/O worker threads (default: CPU count)
    -V, --verbose            Enable trace logging
    -h, --help               Print help information

ADDRESSES:
    8080                     bare port, listens on 0.0.0.0:8080
    10.0.0.1:80              IPv4 with port
    [2001:db8::1]:443        bracketed IPv6 with port
    127.0.0.2                bare IP (port 0; for --src binds)

EXAMPLES:
    tcpmux -l 8080 -d 10.0.0.1:80
    tcpmux -l [::1]:8443 -d [2001:db8::1]:443 -s ::1
    tcpmux -r 8080,10.0.0.1:80/9090,10.0.0.2:80 -w 4 -f /var/log/tcpmux.log
"#
    );
}
