use std::{path::PathBuf, process::ExitCode, sync::Arc};

#[cfg(unix)]
use shadowrad::signal;
use shadowrad::{daemon, logging, Config};
use tokio::sync::watch;
use tracing::{error, info, Level};

const HELP: &str = "\
shadowrad: IPv6 router advertisement daemon

USAGE:
  shadowrad [OPTIONS]

OPTIONS:
  -c, --config <PATH>     configuration file [default: shadowrad.json]
      --log-level <LEVEL> trace, debug, info, warn or error [default: info]
      --log-json          emit logs as JSON
  -h, --help              print this help
";

struct Args {
    config: PathBuf,
    log_level: Level,
    log_json: bool,
}

fn parse_args() -> Result<Option<Args>, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();
    if pargs.contains(["-h", "--help"]) {
        return Ok(None);
    }

    let args = Args {
        config: pargs
            .opt_value_from_os_str(["-c", "--config"], |s| {
                Ok::<_, std::convert::Infallible>(PathBuf::from(s))
            })?
            .unwrap_or_else(|| PathBuf::from("shadowrad.json")),
        log_level: pargs
            .opt_value_from_str("--log-level")?
            .unwrap_or(Level::INFO),
        log_json: pargs.contains("--log-json"),
    };

    let rest = pargs.finish();
    if !rest.is_empty() {
        eprintln!("warning: ignoring unused arguments {rest:?}");
    }
    Ok(Some(args))
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => {
            print!("{HELP}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("error: {e}\n\n{HELP}");
            return ExitCode::from(2);
        }
    };

    if args.log_json {
        logging::init_json(args.log_level);
    } else {
        logging::init_stdout(args.log_level);
    }

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), "failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        path = %args.config.display(),
        interfaces = config.interfaces.len(),
        "loaded configuration"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("shadowrad")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(watch::channel(false).0);
    #[cfg(unix)]
    signal::spawn_shutdown_handler(shutdown.clone());

    let res = runtime.block_on(async {
        let advertisers = daemon::from_config(&config)?;
        daemon::run(advertisers, shutdown).await
    });

    match res {
        Ok(()) => {
            info!("shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("exiting: {e}");
            ExitCode::FAILURE
        }
    }
}
