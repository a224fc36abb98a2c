//! Host-side library for driving Apple iBoot/iBSS/DFU/WTF bootloaders over USB.
//!
//! This crate does not talk to any real USB stack itself: applications
//! implement [Transport] over libusb, IOKit, WinUSB, or similar, and hand it
//! to [Client::new]. What this crate provides is everything above that
//! boundary — the connection/admission state machine, the identity-string
//! parser, the mode-switched upload engine with its DFU CRC-32 trailer, and
//! the bootloader console command channel.

pub use client::{Client, ClientConfig};
pub use device::{AttachedDevice, DeviceInfo, DeviceZone, FinalizationState, Mode};
pub use error::{Error, UsbResult};
pub use event::AdmissionPolicy;
pub use transport::{DeviceDescriptor, DeviceHandle, EventQueue, EventSink, Role, SharedEventSink, Transport, UsbEvent};
pub use upload::{ProgressCallback, SendOptions, UploadEvent, UploadEventKind};

pub mod client;
pub mod command;
pub mod crc;
pub mod device;
pub mod error;
pub mod event;
pub mod identity;
pub mod request;
pub mod sleep;
pub mod table;
pub mod transport;
pub mod upload;

#[cfg(any(test, feature = "mock-transport"))]
pub mod mock;
