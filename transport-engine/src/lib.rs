//! Live rail and bus data for home automation.
//!
//! Polls upstream departure boards per monitored station, falls back
//! between the authenticated Darwin feed and the Huxley2 proxy, and serves
//! destination-filtered views from a single cached fetch.

pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod normalize;
pub mod projection;
pub mod resolver;
pub mod scheduler;
pub mod source;
pub mod web;

#[cfg(test)]
mod testing;
