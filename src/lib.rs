//! Echogate - a diagnostic HTTP/WebSocket server
//!
//! This library provides a small server meant to sit behind proxies, load
//! balancers and service meshes as a test target:
//! - Reports request headers, client address, hostname and local IPs
//! - Delays responses by a caller-supplied duration
//! - Streams generated payloads of an exact requested size
//! - Serves a togglable health status for readiness/liveness testing
//! - Echoes WebSocket text messages back to the sender

pub mod config;
pub mod duration;
pub mod error;
pub mod health;
pub mod inspect;
pub mod netinfo;
pub mod payload;
pub mod server;
pub mod websocket;
