//! Data types shared by the chain state tracker and its collaborators.

pub mod config;
pub mod primitives;
pub mod redacting_url;
pub mod slot;
pub mod validator_set;
