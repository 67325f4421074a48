pub mod config;
pub mod dashboard;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod worker;
