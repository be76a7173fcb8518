pub mod delete;
pub mod get;
pub mod put;
pub mod upload;

pub use delete::*;
pub use get::*;
pub use put::*;
pub use upload::*;
