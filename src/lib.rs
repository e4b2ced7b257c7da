pub mod cli;
pub mod db;
pub mod memory;
pub mod migrations;
pub mod model;
pub mod provision;
pub mod store;
