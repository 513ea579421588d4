//! LEXIS Core Library
//! 
//! Core types, traits, and configuration shared by the LEXIS state store
//! and its hosts.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
