//! Binary entry point: parse CLI flags, load `config.txt`, bring up the
//! Supervisor, and block until killed. The HTML/JS UI and any IPC layer
//! that would drive the Presenter over a socket are external collaborators
//! (spec §1) this binary does not implement; a UI adapter links against
//! `securetalks::presenter::Presenter` directly.

use std::path::PathBuf;

use clap::Parser;

use securetalks::config::Config;
use securetalks::supervisor::{Supervisor, DEFAULT_TTL_SECONDS};

#[derive(Parser, Debug)]
#[command(name = "securetalks", about = "Decentralized peer-to-peer end-to-end encrypted chat node")]
struct Args {
    /// Directory holding pub.pem, prv.pem, db.sqlite3, bootstrap.list, config.txt.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Ciphergram/peer expiry window in seconds.
    #[arg(long, default_value_t = DEFAULT_TTL_SECONDS)]
    ttl_seconds: i64,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".securetalks")
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);

    let config = Config::load(&data_dir.join("config.txt"));
    log::info!(
        "starting node in {} (listening on {}:{})",
        data_dir.display(),
        config.server_address,
        config.server_port
    );

    let supervisor = match Supervisor::start(&data_dir, config, args.ttl_seconds, None) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            log::error!("failed to start node: {e}");
            std::process::exit(1);
        }
    };

    log::info!("node id: {}", supervisor.presenter().my_id());

    // The node runs until the process is killed; there is no in-process
    // signal here to drive an orderly `Supervisor::shutdown()` because the
    // only caller of that API in this crate is the integration tests,
    // which spin up and tear down their own Supervisors directly.
    loop {
        std::thread::park();
    }
}
