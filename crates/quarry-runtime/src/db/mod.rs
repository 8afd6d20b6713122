mod connection;

pub use connection::{connect, connect_options};
