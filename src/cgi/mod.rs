pub mod env;
pub mod process;
pub mod response;

pub use env::*;
pub use process::*;
pub use response::*;
