use mio::Poll;
use webserv::config;
use webserv::error::Result;
use webserv::prelude::{info, warn};
use webserv::server::Server;

const DEFAULT_CONFIG: &str = "webserv.conf";

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| {
        warn!("no configuration file given, trying {}", DEFAULT_CONFIG);
        DEFAULT_CONFIG.to_string()
    });

    let servers = config::load(&config_path)?;
    info!(
        "{}: {} server block{} published",
        config_path,
        servers.len(),
        if servers.len() == 1 { "" } else { "s" }
    );
    for server in &servers {
        info!(
            "  {} @ {:?}",
            server.server_names().join(" "),
            server.socket_addresses()
        );
    }

    let poll = Poll::new()?;
    let mut server = Server::new(servers, &poll)?;
    server.run(poll)
}
