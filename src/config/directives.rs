use crate::prelude::*;

/// Directive storage shared by server and location scopes.
///
/// Every field doubles as its own presence flag: `None` means the directive
/// was never set in this scope, which is what drives server-to-location
/// inheritance (a location only receives the server's value for directives
/// it did not set itself).
#[derive(Debug, Clone, Default)]
pub struct Directives {
    root_path: Option<String>,
    autoindex: Option<bool>,
    cgi_path: Option<String>,
    cgi_timeout: Option<u64>,
    client_max_body_size: Option<usize>,
    keep_alive: Option<bool>,
    redirect: Option<(u16, String)>,
    indexes: Option<Vec<String>>,
    status_paths: Option<HashMap<u16, String>>,
    allowed_methods: Option<Vec<String>>,
}

impl Directives {
    pub fn new() -> Self {
        Directives::default()
    }

    // Mutators

    pub fn set_root_path(&mut self, root: &str) {
        let trimmed = if root.len() > 1 {
            root.trim_end_matches('/')
        } else {
            root
        };
        self.root_path = Some(trimmed.to_string());
    }

    pub fn set_autoindex(&mut self, on: bool) {
        self.autoindex = Some(on);
    }

    /// Stored as a directory or interpreter path with trailing slashes
    /// stripped.
    pub fn set_cgi_path(&mut self, path: &str) {
        let trimmed = if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        };
        self.cgi_path = Some(trimmed.to_string());
    }

    pub fn set_cgi_timeout(&mut self, secs: u64) {
        self.cgi_timeout = Some(secs);
    }

    pub fn set_client_max_body_size(&mut self, size: usize) {
        self.client_max_body_size = Some(size);
    }

    pub fn set_keep_alive(&mut self, on: bool) {
        self.keep_alive = Some(on);
    }

    pub fn set_redirect(&mut self, code: u16, target: &str) {
        self.redirect = Some((code, target.to_string()));
    }

    /// Index filenames keep declaration order; duplicates are ignored.
    pub fn insert_index(&mut self, index: &str) {
        let list = self.indexes.get_or_insert_with(Vec::new);
        if !list.iter().any(|i| i == index) {
            list.push(index.to_string());
        }
    }

    pub fn insert_status_path(&mut self, codes: &[u16], path: &str) {
        let map = self.status_paths.get_or_insert_with(HashMap::new);
        for code in codes {
            map.insert(*code, path.to_string());
        }
    }

    pub fn insert_allowed_method(&mut self, method: &str) {
        let list = self.allowed_methods.get_or_insert_with(Vec::new);
        let token = method.to_ascii_uppercase();
        if !list.iter().any(|m| *m == token) {
            list.push(token);
        }
    }

    // Presence flags

    pub fn has_root_path(&self) -> bool {
        self.root_path.is_some()
    }

    pub fn has_autoindex(&self) -> bool {
        self.autoindex.is_some()
    }

    pub fn has_cgi_path(&self) -> bool {
        self.cgi_path.is_some()
    }

    pub fn has_cgi_timeout(&self) -> bool {
        self.cgi_timeout.is_some()
    }

    pub fn has_client_max_body_size(&self) -> bool {
        self.client_max_body_size.is_some()
    }

    pub fn has_keep_alive(&self) -> bool {
        self.keep_alive.is_some()
    }

    pub fn has_redirect(&self) -> bool {
        self.redirect.is_some()
    }

    pub fn has_indexes(&self) -> bool {
        self.indexes.is_some()
    }

    pub fn has_status_paths(&self) -> bool {
        self.status_paths.is_some()
    }

    pub fn has_allowed_methods(&self) -> bool {
        self.allowed_methods.is_some()
    }

    pub fn was_modified(&self) -> bool {
        self.root_path.is_some()
            || self.autoindex.is_some()
            || self.cgi_path.is_some()
            || self.cgi_timeout.is_some()
            || self.client_max_body_size.is_some()
            || self.keep_alive.is_some()
            || self.redirect.is_some()
            || self.indexes.is_some()
            || self.status_paths.is_some()
            || self.allowed_methods.is_some()
    }

    // Effective accessors (configured value or protocol default)

    pub fn root_path(&self) -> Option<&str> {
        self.root_path.as_deref()
    }

    pub fn autoindex(&self) -> bool {
        self.autoindex.unwrap_or(DEFAULT_AUTOINDEX)
    }

    pub fn cgi_path(&self) -> Option<&str> {
        self.cgi_path.as_deref()
    }

    pub fn cgi_timeout(&self) -> Duration {
        Duration::from_secs(self.cgi_timeout.unwrap_or(DEFAULT_CGI_TIMEOUT_SECS))
    }

    pub fn client_max_body_size(&self) -> usize {
        self.client_max_body_size
            .unwrap_or(DEFAULT_CLIENT_MAX_BODY_SIZE)
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE)
    }

    pub fn redirect(&self) -> Option<(u16, &str)> {
        self.redirect.as_ref().map(|(c, t)| (*c, t.as_str()))
    }

    pub fn indexes(&self) -> &[String] {
        self.indexes.as_deref().unwrap_or(&[])
    }

    pub fn status_path(&self, code: u16) -> Option<&str> {
        self.status_paths
            .as_ref()
            .and_then(|m| m.get(&code))
            .map(|s| s.as_str())
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        match &self.allowed_methods {
            Some(list) => list.iter().any(|m| m == method.as_str()),
            None => Method::SUPPORTED.contains(&method.as_str()),
        }
    }

    pub fn allowed_methods(&self) -> Vec<String> {
        match &self.allowed_methods {
            Some(list) => list.clone(),
            None => Method::SUPPORTED.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// One-time copy of the parent scope's values into this scope, for every
    /// directive this scope did not set.
    pub fn inherit_from(&mut self, parent: &Directives) {
        if self.root_path.is_none() {
            self.root_path = parent.root_path.clone();
        }
        if self.autoindex.is_none() {
            self.autoindex = parent.autoindex;
        }
        if self.cgi_path.is_none() {
            self.cgi_path = parent.cgi_path.clone();
        }
        if self.cgi_timeout.is_none() {
            self.cgi_timeout = parent.cgi_timeout;
        }
        if self.client_max_body_size.is_none() {
            self.client_max_body_size = parent.client_max_body_size;
        }
        if self.keep_alive.is_none() {
            self.keep_alive = parent.keep_alive;
        }
        if self.redirect.is_none() {
            self.redirect = parent.redirect.clone();
        }
        if self.indexes.is_none() {
            self.indexes = parent.indexes.clone();
        }
        if self.status_paths.is_none() {
            self.status_paths = parent.status_paths.clone();
        }
        if self.allowed_methods.is_none() {
            self.allowed_methods = parent.allowed_methods.clone();
        }
    }
}

/// A URI-path-prefixed override of its server's directives.
#[derive(Debug, Clone, Default)]
pub struct Location {
    path: String,
    pub directives: Directives,
}

impl Location {
    pub fn new(path: &str) -> Self {
        Location {
            path: path.to_string(),
            directives: Directives::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn was_modified(&self) -> bool {
        self.directives.was_modified()
    }
}

/// A configured virtual host: identifiers plus shared directives plus a
/// prefix-indexed map of location blocks.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub directives: Directives,
    server_names: PrefixTree<()>,
    name_order: Vec<String>,
    socket_addresses: Vec<SocketAddr>,
    pub locations: PrefixTree<Location>,
}

impl ServerConfig {
    pub fn new() -> Self {
        ServerConfig::default()
    }

    pub fn insert_server_name(&mut self, name: &str) {
        if !self.server_names.contains(name) && self.server_names.insert(name, ()) {
            self.name_order.push(name.to_string());
        }
    }

    pub fn has_server_name(&self, name: &str) -> bool {
        self.server_names.contains(name)
    }

    pub fn server_names(&self) -> &[String] {
        &self.name_order
    }

    pub fn primary_name(&self) -> &str {
        self.name_order.first().map(|s| s.as_str()).unwrap_or("_")
    }

    /// Addresses stay ordered and deduplicated.
    pub fn insert_socket_address(&mut self, addr: SocketAddr) {
        if !self.socket_addresses.contains(&addr) {
            self.socket_addresses.push(addr);
        }
    }

    pub fn socket_addresses(&self) -> &[SocketAddr] {
        &self.socket_addresses
    }

    pub fn insert_location(&mut self, location: Location) {
        let key = location.path().to_string();
        self.locations.insert(&key, location);
    }

    pub fn find_location(&self, uri_path: &str) -> Option<&Location> {
        self.locations.find_longest_prefix(uri_path).map(|(_, l)| l)
    }

    /// A server only reaches the listener set when it can be addressed and
    /// actually configures something.
    pub fn is_published(&self) -> bool {
        !self.name_order.is_empty() && !self.socket_addresses.is_empty() && self.was_modified()
    }

    pub fn was_modified(&self) -> bool {
        self.directives.was_modified()
            || !self.name_order.is_empty()
            || !self.socket_addresses.is_empty()
            || !self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inheritance_respects_presence() {
        let mut server = Directives::new();
        server.set_root_path("/srv");
        server.set_autoindex(true);
        server.set_client_max_body_size(2048);

        let mut loc = Directives::new();
        loc.set_autoindex(false);
        loc.inherit_from(&server);

        assert_eq!(loc.root_path(), Some("/srv"));
        assert!(!loc.autoindex());
        assert_eq!(loc.client_max_body_size(), 2048);
    }

    #[test]
    fn test_cgi_path_trailing_slash_stripped() {
        let mut d = Directives::new();
        d.set_cgi_path("/usr/lib/cgi-bin///");
        assert_eq!(d.cgi_path(), Some("/usr/lib/cgi-bin"));
    }

    #[test]
    fn test_default_methods_when_unset() {
        let d = Directives::new();
        assert!(d.allows_method(&Method::Get));
        assert!(d.allows_method(&Method::Put));
        assert!(!d.allows_method(&Method::Extension("PATCH".into())));
    }

    #[test]
    fn test_method_allow_list() {
        let mut d = Directives::new();
        d.insert_allowed_method("get");
        d.insert_allowed_method("POST");
        assert!(d.allows_method(&Method::Get));
        assert!(d.allows_method(&Method::Post));
        assert!(!d.allows_method(&Method::Delete));
    }

    #[test]
    fn test_publication_rules() {
        let mut server = ServerConfig::new();
        assert!(!server.is_published());
        server.insert_server_name("example.com");
        assert!(!server.is_published());
        server.insert_socket_address("127.0.0.1:8080".parse().unwrap());
        assert!(server.is_published());
    }

    #[test]
    fn test_socket_addresses_dedup() {
        let mut server = ServerConfig::new();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        server.insert_socket_address(addr);
        server.insert_socket_address(addr);
        assert_eq!(server.socket_addresses().len(), 1);
    }

    #[test]
    fn test_index_declaration_order() {
        let mut d = Directives::new();
        d.insert_index("index.html");
        d.insert_index("default.html");
        d.insert_index("index.html");
        assert_eq!(d.indexes(), &["index.html", "default.html"]);
    }
}
