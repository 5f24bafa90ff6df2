pub mod assets;
pub mod client;
pub mod config;
pub mod corpus;
pub mod credentials;
pub mod delete;
pub mod error;
pub mod extract;
pub mod github;
pub mod migrate;
pub mod model;
pub mod rate_limit;
pub mod redirect;
pub mod transform;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;
