pub mod connection;
pub mod documents;
pub mod migrate;
