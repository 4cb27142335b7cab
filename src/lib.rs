pub mod config;
pub mod diff;
pub mod document;
pub mod entity;
pub mod extractor;
pub mod lens;
pub mod matcher;
pub mod recovery;
pub mod revision;
pub mod server;
pub mod terminal;
