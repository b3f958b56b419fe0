//! Scripted native client for exercising [`Connection`](crate::pgsql::Connection)
//! without a server.

mod mock;

pub use mock::{MockClient, MockConnector, MockLog};
