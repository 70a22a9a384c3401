//! Trait seams between the command layer and the transport

mod remote;

pub use remote::Remote;
