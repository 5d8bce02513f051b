pub mod bridge;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod log;
pub mod mock;
pub mod shared;
pub mod socket;
pub mod transport;
pub mod wait;

pub use config::SocketConfig;
pub use dispatch::DeliveryMode;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
pub use shared::LinkState;
pub use socket::DataSocket;
pub use socket::DataSocketBuilder;
pub use tagframe::Frame;
pub use tagframe::tags;
pub use transport::Connector;
pub use transport::TcpConnector;
pub use transport::TransportError;
pub use wait::WaitHandle;

#[cfg(test)]
mod tests;
