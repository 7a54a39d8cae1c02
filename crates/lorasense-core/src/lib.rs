//! Hardware-independent core library for lorasense
//!
//! This crate contains all platform-agnostic logic of the LoRa sensor node:
//! configuration, the DHT22 protocol, battery conversion, the JSON payload,
//! the retained boot-count block, the status screens and the wake-cycle
//! policy that ties them together.
//!
//! It is `#![no_std]` so it compiles on both the ESP32 target and desktop
//! hosts (for the simulator and tests). Hardware is reached only through the
//! traits in [`sensors`], [`battery`], [`radio`] and [`display`].

#![no_std]

pub mod battery;
pub mod config;
pub mod cycle;
pub mod display;
pub mod framebuffer;
pub mod payload;
pub mod radio;
pub mod retained;
pub mod sensors;

pub use config::NodeConfig;
pub use cycle::{CycleOutcome, CyclePlan, CycleReport, NextWake, Node, run_cycle};
pub use retained::RetainedState;
