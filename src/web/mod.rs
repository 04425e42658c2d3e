pub mod api;
pub mod api_doc;
pub mod live;
pub mod server;

pub use server::run_server;
