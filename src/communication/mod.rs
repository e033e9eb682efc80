//! Line delimited JSON messaging between the console and its agents.
//!
//! Agents dial the console twice: a control connection on which the console
//! broadcasts commands through a [`FanOutSender`], and a report connection
//! whose status messages are merged by a [`ServerReceiver`]. Both sit on one
//! [`Acceptor`] that routes connections by their [`Handshake`].

mod acceptor;
mod client;
mod codec;
mod handler;
mod message;
mod receiver;
mod sender;

pub use acceptor::{Acceptor, Connection};
pub use client::connect;
pub use handler::{HandlerChain, MessageHandler};
pub use message::{
    AgentProcessStatus, ConnectionType, FileContents, Handshake, InitialiseWorkerMessage,
    ProcessState, StartMessage, WireMessage, WorkerProcessStatus,
};
pub use receiver::ServerReceiver;
pub use sender::FanOutSender;

pub(crate) use codec::{read_message, send_message};
