// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::path::Path;

use broker::config::Config;
use broker::log::init_log;
use broker::{listener, server::Server, Error};
use clap::Parser;

const DEFAULT_CONFIG: &str = "/etc/broker/broker.toml";

#[derive(Parser, Debug)]
#[command(name = "broker", version, about = "MQTT 3.1.1 broker")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, value_name = "config_file")]
    config: Option<String>,

    /// Parse the config file, print whether it is valid, and exit.
    #[arg(short = 't', long = "test")]
    test_config: bool,
}

fn load_config(cli: &Cli) -> Result<Config, Error> {
    let config_file = cli
        .config
        .as_deref()
        .or_else(|| Path::new(DEFAULT_CONFIG).exists().then_some(DEFAULT_CONFIG));

    match config_file {
        Some(path) => Config::load(Path::new(path)),
        None => Ok(Config::default()),
    }
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.test_config {
        println!("configuration is valid");
        return Ok(());
    }

    init_log(config.log())?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let server = Server::new(config);
        server.spawn_background_tasks();
        listener::run_listeners(&server).await?;

        // Listener accept loops run as background tasks; park the main
        // task so the process stays alive.
        std::future::pending::<()>().await;
        Ok::<(), Error>(())
    })
}
