pub mod blob;
pub mod config;
pub mod db;
pub mod output;
pub mod pipeline;
pub mod provider;
pub mod threads;
