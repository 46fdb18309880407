use anyhow::Result;
use clap::Parser;
use timefence::{
    engine::{args::HostArgs, start_host},
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, HOST_PREFIX},
        runtime::single_thread_runtime,
    },
};
use tracing::{error, info};

fn main() -> Result<()> {
    let args = HostArgs::parse();
    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;
    enable_logging(HOST_PREFIX, &app_dir, args.log, args.log_console)?;

    if let Some(origin) = &args.origin {
        info!("Host started by {origin}");
    }

    single_thread_runtime()?
        .block_on(start_host(app_dir))
        .inspect_err(|e| {
            error!("Error running host {e:?}");
        })?;
    Ok(())
}
