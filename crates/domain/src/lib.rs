pub mod audit;
pub mod config;
pub mod error;
pub mod event;
pub mod instance;
pub mod run;
pub mod spec;
pub mod template;
pub mod tenant;
pub mod usage;

pub use error::{Error, Result};
