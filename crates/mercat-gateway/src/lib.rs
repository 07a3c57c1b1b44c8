pub mod connection;
pub mod dispatcher;

pub use connection::{ConnectionState, Gateway, handle_connection};
pub use dispatcher::Dispatcher;
