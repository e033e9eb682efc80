//! Core library for the `stampede` CLI.
//!
//! A console coordinates remote agents over TCP: it distributes files to
//! their caches, tells them to start, stop or reset worker processes and
//! collects their status reports. A recording proxy sits between a browser
//! and a web server and turns the HTTP traffic it sees into a replayable
//! document.
pub mod agent;
pub mod args;
pub mod communication;
pub mod config;
pub mod console;
pub mod entry;
pub mod error;
pub mod logger;
pub mod proxy;
pub mod shutdown;
pub mod shutdown_handlers;
pub mod sleeper;
