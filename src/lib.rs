pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod registry;
pub mod shutdown;
pub mod waiter;
