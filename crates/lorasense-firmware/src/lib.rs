//! ESP32 firmware-specific modules for lorasense
//!
//! Board adapters for the TTGO LoRa32 V1.6: each module wraps one on-board
//! peripheral behind the matching `lorasense_core` trait. Nothing here
//! compiles for desktop targets.

#![no_std]

pub mod battery;
pub mod config;
pub mod display;
pub mod led;
pub mod radio;
pub mod retained;
pub mod sensor;
pub mod sleep;
