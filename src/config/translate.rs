//! Turns the parsed syntax tree into the ordered list of fully inherited
//! server objects the router runs on. Directive-level problems are warned
//! about and dropped; the process never aborts over a bad directive.

use super::ast::{ConfigAst, DirectiveNode, LocationNode, ServerNode};
use crate::prelude::*;

pub fn resolve(ast: ConfigAst) -> Vec<Arc<ServerConfig>> {
    let mut servers = Vec::new();

    for node in &ast.servers {
        match translate_server(node) {
            Some(server) => servers.push(Arc::new(server)),
            None => {
                warn!(
                    "dropping server block at line {}: no usable configuration",
                    node.line
                );
            }
        }
    }

    servers
}

fn translate_server(node: &ServerNode) -> Option<ServerConfig> {
    let mut server = ServerConfig::new();

    for directive in &node.directives {
        match directive.name.as_str() {
            "listen" => apply_listen(&mut server, directive),
            "server_name" => apply_server_name(&mut server, directive),
            _ => apply_directive(&mut server.directives, directive),
        }
    }

    for loc_node in &node.locations {
        match translate_location(loc_node) {
            Some(location) => {
                if server.locations.contains(location.path()) {
                    warn!(
                        "line {}: duplicate location '{}' skipped",
                        loc_node.line,
                        location.path()
                    );
                } else {
                    server.insert_location(location);
                }
            }
            None => {
                warn!("line {}: location block dropped", loc_node.line);
            }
        }
    }

    if server.server_names().is_empty() {
        warn!("line {}: server block has no server_name", node.line);
        return None;
    }
    if server.socket_addresses().is_empty() {
        warn!("line {}: server block has no listen address", node.line);
        return None;
    }
    if !server.directives.was_modified() && server.locations.is_empty() {
        warn!("line {}: server block sets no directives", node.line);
        return None;
    }

    inherit_locations(&mut server);

    Some(server)
}

fn translate_location(node: &LocationNode) -> Option<Location> {
    if !node.path.starts_with('/') {
        warn!(
            "line {}: location path '{}' must begin with '/'",
            node.line, node.path
        );
        return None;
    }

    let mut location = Location::new(&node.path);
    for directive in &node.directives {
        match directive.name.as_str() {
            "listen" | "server_name" => {
                warn!(
                    "line {}: '{}' is not valid inside a location block",
                    directive.line, directive.name
                );
            }
            _ => apply_directive(&mut location.directives, directive),
        }
    }

    if !location.was_modified() {
        warn!("line {}: location '{}' sets no directives", node.line, node.path);
        return None;
    }

    Some(location)
}

/// Server-to-location inheritance, then the synthetic `/` location when the
/// server declared a root but no exact `/` block exists.
fn inherit_locations(server: &mut ServerConfig) {
    let parent = server.directives.clone();

    let paths: Vec<String> = server.locations.iter().map(|(k, _)| k.clone()).collect();
    for path in &paths {
        if let Some(location) = server.locations.remove(path) {
            let mut location = location;
            location.directives.inherit_from(&parent);
            server.insert_location(location);
        }
    }

    if parent.has_root_path() && server.locations.find_exact("/").is_none() {
        let mut root_location = Location::new("/");
        root_location.directives = parent;
        server.insert_location(root_location);
    }
}

fn apply_listen(server: &mut ServerConfig, directive: &DirectiveNode) {
    if directive.args.is_empty() {
        warn!("line {}: 'listen' needs an address", directive.line);
        return;
    }
    warn_extra_args(directive, 1);

    match parse_listen_addr(&directive.args[0]) {
        Some(addr) => server.insert_socket_address(addr),
        None => {
            warn!(
                "line {}: cannot parse listen address '{}'",
                directive.line, directive.args[0]
            );
        }
    }
}

fn parse_listen_addr(arg: &str) -> Option<SocketAddr> {
    if let Ok(port) = arg.parse::<u16>() {
        return Some(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    if let Ok(addr) = arg.parse::<SocketAddr>() {
        return Some(addr);
    }
    if let Some(rest) = arg.strip_prefix("localhost:") {
        if let Ok(port) = rest.parse::<u16>() {
            return Some(SocketAddr::from(([127, 0, 0, 1], port)));
        }
    }
    None
}

fn apply_server_name(server: &mut ServerConfig, directive: &DirectiveNode) {
    if directive.args.is_empty() {
        warn!("line {}: 'server_name' needs at least one name", directive.line);
        return;
    }
    for name in &directive.args {
        server.insert_server_name(name);
    }
}

fn apply_directive(directives: &mut Directives, node: &DirectiveNode) {
    match node.name.as_str() {
        "root" => {
            if let Some(path) = scalar_path_arg(node) {
                directives.set_root_path(&path);
            }
        }
        "autoindex" => {
            if let Some(on) = scalar_bool_arg(node) {
                directives.set_autoindex(on);
            }
        }
        "keep_alive" => {
            if let Some(on) = scalar_bool_arg(node) {
                directives.set_keep_alive(on);
            }
        }
        "cgi_path" => {
            if let Some(path) = scalar_path_arg(node) {
                directives.set_cgi_path(&path);
            }
        }
        "cgi_timeout" => {
            if let Some(arg) = scalar_arg(node) {
                match arg.parse::<u64>() {
                    Ok(secs) if secs > 0 => directives.set_cgi_timeout(secs),
                    _ => warn!(
                        "line {}: 'cgi_timeout' needs a positive number of seconds",
                        node.line
                    ),
                }
            }
        }
        "client_max_body_size" => {
            if let Some(arg) = scalar_arg(node) {
                match parse_size(&arg) {
                    Some(size) => directives.set_client_max_body_size(size),
                    None => warn!(
                        "line {}: malformed size '{}' for client_max_body_size",
                        node.line, arg
                    ),
                }
            }
        }
        "redirect" | "return" => apply_redirect(directives, node),
        "error_page" => apply_error_page(directives, node),
        "index" => {
            if node.args.is_empty() {
                warn!("line {}: 'index' needs at least one filename", node.line);
                return;
            }
            for name in &node.args {
                directives.insert_index(name);
            }
        }
        "allowed_methods" => {
            if node.args.is_empty() {
                warn!("line {}: 'allowed_methods' needs at least one method", node.line);
                return;
            }
            for method in &node.args {
                directives.insert_allowed_method(method);
            }
        }
        other => {
            warn!("line {}: unknown directive '{}' ignored", node.line, other);
        }
    }
}

fn apply_redirect(directives: &mut Directives, node: &DirectiveNode) {
    if node.args.len() < 2 {
        warn!(
            "line {}: '{}' needs a status code and a target",
            node.line, node.name
        );
        return;
    }
    warn_extra_args(node, 2);

    let code = match node.args[0].parse::<u16>() {
        Ok(c) if (100..=599).contains(&c) => c,
        _ => {
            warn!(
                "line {}: invalid redirect status '{}'",
                node.line, node.args[0]
            );
            return;
        }
    };

    directives.set_redirect(code, &node.args[1]);
}

fn apply_error_page(directives: &mut Directives, node: &DirectiveNode) {
    if node.args.len() < 2 {
        warn!(
            "line {}: 'error_page' needs one or more status codes and a path",
            node.line
        );
        return;
    }

    let path = node.args.last().unwrap();
    if !path_is_clean(path) {
        warn!("line {}: suspicious error_page path '{}' dropped", node.line, path);
        return;
    }

    let mut codes = Vec::new();
    for arg in &node.args[..node.args.len() - 1] {
        match arg.parse::<u16>() {
            Ok(c) if (100..=599).contains(&c) => codes.push(c),
            _ => {
                warn!("line {}: invalid error_page status '{}'", node.line, arg);
            }
        }
    }

    if codes.is_empty() {
        warn!("line {}: 'error_page' has no valid status codes", node.line);
        return;
    }

    directives.insert_status_path(&codes, path);
}

fn scalar_arg(node: &DirectiveNode) -> Option<String> {
    if node.args.is_empty() {
        warn!("line {}: '{}' needs an argument", node.line, node.name);
        return None;
    }
    warn_extra_args(node, 1);
    Some(node.args[0].clone())
}

fn scalar_bool_arg(node: &DirectiveNode) -> Option<bool> {
    let arg = scalar_arg(node)?;
    match arg.as_str() {
        "on" | "true" => Some(true),
        "off" | "false" => Some(false),
        _ => {
            warn!(
                "line {}: '{}' expects on or off, got '{}'",
                node.line, node.name, arg
            );
            None
        }
    }
}

fn scalar_path_arg(node: &DirectiveNode) -> Option<String> {
    let arg = scalar_arg(node)?;
    if !path_is_clean(&arg) {
        warn!(
            "line {}: suspicious path '{}' for '{}' dropped",
            node.line, arg, node.name
        );
        return None;
    }
    Some(arg)
}

fn warn_extra_args(node: &DirectiveNode, expected: usize) {
    if node.args.len() > expected {
        warn!(
            "line {}: extra arguments after '{}' ignored",
            node.line, node.name
        );
    }
}

/// Control characters, consecutive dots, and embedded spaces all make a
/// path suspicious enough to refuse.
fn path_is_clean(path: &str) -> bool {
    !path.is_empty()
        && !path.chars().any(|c| c.is_control())
        && !path.contains("..")
        && !path.contains(' ')
}

/// Sizes accept an optional single-letter suffix `K`, `M`, or `G`
/// (powers of 1024).
fn parse_size(arg: &str) -> Option<usize> {
    if arg.is_empty() {
        return None;
    }

    let (digits, multiplier) = match arg.chars().last() {
        Some('k') | Some('K') => (&arg[..arg.len() - 1], 1024usize),
        Some('m') | Some('M') => (&arg[..arg.len() - 1], 1024 * 1024),
        Some('g') | Some('G') => (&arg[..arg.len() - 1], 1024 * 1024 * 1024),
        _ => (arg, 1),
    };

    let value: usize = digits.parse().ok()?;
    value.checked_mul(multiplier)
}
