//! SSH transport built on russh

mod handler;
mod remote;
mod session;

pub use handler::ClientHandler;
pub use remote::SshRemote;
pub use session::SshSession;
