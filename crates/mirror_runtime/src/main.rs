//! Mirror Runtime
//!
//! Runs the todo demo headless: a UI session on its own thread, a client
//! replica rendering into an in-memory document, JSON envelopes between them
//! over crossbeam channels.

mod app;
mod config;
mod transport;

use config::RuntimeConfig;
use crossbeam_channel::unbounded;
use mirror_client::{ClientReplica, MemoryDom};
use mirror_core::NamespaceId;
use mirror_server::{SessionHandle, UiSession};
use transport::{ClientDriver, TransportResult};

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match RuntimeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    };
    config.log_summary();

    if let Err(e) = run(&config) {
        log::error!("Demo failed: {}", e);
        std::process::exit(1);
    }
}

fn run(config: &RuntimeConfig) -> TransportResult<()> {
    let mut session = UiSession::new(config.session.clone());
    let app = app::install(&mut session)?;
    let handle = SessionHandle::from_session(session);

    let (to_server, server_inbound) = unbounded();
    let (to_client, from_server) = unbounded();
    let server = transport::spawn_server(handle.clone(), server_inbound, to_client.clone())?;

    let replica = ClientReplica::new(config.client.clone(), MemoryDom::new(&config.session.root_tag));
    let mut client = ClientDriver::new(replica, to_server, from_server, config.demo.reply_timeout());
    client.receive()?;
    log::info!("Initial render: {}", client.replica.dom().render());

    client.run_script(&config.demo)?;

    // A server-side job updating the page without a client request
    let (_, pushed) = handle.access(|session| {
        session
            .tree_mut()
            .put(app.badge, NamespaceId::TemplateBinding, "location", "saved")
    })?;
    transport::push(&to_client, pushed)?;
    client.receive()?;

    let items = handle.with_session(|s| {
        s.tree()
            .list_len(app.list, NamespaceId::ElementChildren)
            .unwrap_or_default()
    });
    log::info!("Final render ({} items): {}", items, client.replica.dom().render());

    let in_sync = handle.with_session(|s| s.snapshot()) == client.replica.snapshot();
    if in_sync {
        log::info!("Client replica matches the session");
    } else {
        log::warn!("Client replica diverged from the session");
    }
    let stats = handle.with_session(|s| s.stats().clone());
    log::info!(
        "Session: {} turns, {} changes sent, {} events; client: {} messages applied",
        stats.turns,
        stats.changes_sent,
        stats.events,
        client.replica.stats().messages_applied
    );

    drop(client);
    if server.join().is_err() {
        log::error!("Session thread panicked");
    }
    Ok(())
}
