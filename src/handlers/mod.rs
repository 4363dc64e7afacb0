pub mod config;
pub mod embed;
pub mod extract;

pub use self::config::*;
pub use self::embed::*;
pub use self::extract::*;
