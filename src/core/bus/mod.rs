// src/core/bus/mod.rs

//! Message bus client: a persistent MQTT connection with automatic
//! reconnect, topic routing, and a bounded outbound queue.

mod client;

pub use client::{BusClient, BusStats};
