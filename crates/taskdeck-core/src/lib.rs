pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod notice;
pub mod render;
pub mod session;
pub mod store;
pub mod task;
pub mod view;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use crate::session::Session;
use crate::store::TaskStore;
use crate::view::StatusFilter;

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let cli = cli::GlobalCli::parse_from(raw_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting taskdeck CLI"
    );

    let mut cfg = config::Config::load(cli.config.as_deref())?;
    cfg.apply_overrides(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value)));

    let command = cli.command.unwrap_or(cli::Command::List {
        status: StatusFilter::All,
        search: String::new(),
    });
    debug!(?command, "resolved command");

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async move {
        let table = config::resolve_table(&cfg)?;

        // The identity service is external; the session handle carries
        // whatever identity configuration resolved.
        let session = Session::new();
        if let Some(identity) = config::resolve_identity(&cfg)? {
            session.sign_in(identity);
        }

        let (notices, mut notices_rx) = notice::channel();
        let store = TaskStore::new(table, session, notices);
        store.start();

        let mut renderer = render::Renderer::new(&cfg)?;
        let result = commands::dispatch(&store, &mut renderer, &mut notices_rx, command).await;
        store.stop();
        result
    })?;

    info!("done");
    Ok(())
}
