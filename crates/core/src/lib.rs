#![deny(warnings)]

pub mod config;
pub mod engine;
pub mod fsutil;
pub mod session;
pub mod sink;
pub mod wave;
