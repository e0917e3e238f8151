//! ggnetd — file server node built on the ggnet transport and store.

pub mod message;
pub mod server;

pub use message::NodeMessage;
pub use server::{FileServer, FileServerOpts, PeerMap};
