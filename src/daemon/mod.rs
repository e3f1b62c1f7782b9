pub mod ingest;
pub mod live;
pub mod server;

pub use server::run_daemon;
