use std::path::PathBuf;

use anyhow::Context;
use tracing::error;

mod config;
mod crtc;
mod daemon;
mod edid;
mod error;
mod layout;
mod lid;
mod mode;
mod notify;
mod output;
mod randr_util;
mod reconcile;
mod server;
mod udev_util;

use config::Config;
use output::Directory;
use randr_util::Randr;

fn show_outputs() -> anyhow::Result<()> {
    let randr = Randr::connect().context("error connecting to X server")?;
    let dir = Directory::discover(&randr).context("error listing outputs")?;

    println!("Outputs:");
    for line in dir.describe() {
        println!("{line}");
    }
    Ok(())
}

fn run(path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load(&path)
        .with_context(|| format!("error loading config from {}", path.display()))?;
    daemon::run(config)
}

fn main() {
    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().compact().init();
    }

    let res = match std::env::args_os().nth(1) {
        Some(path) => run(PathBuf::from(path)),
        None => show_outputs(),
    };

    if let Err(err) = res {
        error!("{err:?}");
        std::process::exit(1);
    }
}
