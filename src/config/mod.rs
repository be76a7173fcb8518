pub mod ast;
pub mod directives;
pub mod lexer;
pub mod translate;

pub use ast::{ConfigAst, DirectiveNode, LocationNode, ServerNode};
pub use directives::{Directives, Location, ServerConfig};
pub use lexer::ConfigError;
pub use translate::resolve;

use crate::error::Result;
use std::sync::Arc;

/// Reads and resolves a configuration file into the published server list.
pub fn load(path: &str) -> Result<Vec<Arc<ServerConfig>>> {
    let content = std::fs::read_to_string(path)?;
    let ast = ConfigAst::parse(&content)?;
    Ok(resolve(ast))
}
