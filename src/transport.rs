//! The contract this library expects from the platform's USB layer.
//!
//! Everything below is a thin, synchronous interface: control transfer, bulk
//! transfer, descriptor fetch, role query, device reset, and event
//! subscription. A real implementation backs this with libusb, IOKit,
//! WinUSB, or similar; this crate ships none of those, only the trait and
//! (behind `mock-transport`) an in-memory fake used by its own tests.

use std::collections::VecDeque;
use std::rc::Rc;
use std::cell::RefCell;

use crate::error::UsbResult;

/// Opaque handle to a device, as assigned by the transport. Two handles
/// compare equal iff they refer to the same underlying device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// The USB role the host currently holds on the bus this transport manages.
///
/// Apple's recovery/DFU modes are reached over cables that can flip which
/// side is acting as host (e.g. a Lightning/USB-C OTG adapter); the event
/// state machine (§4.1) needs to know whether the local side is still "the
/// host" before it will act on a connect/enable event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Host,
    Other,
}

impl Default for Role {
    fn default() -> Self {
        Role::Host
    }
}

impl Role {
    pub fn is_host(&self) -> bool {
        matches!(self, Role::Host)
    }
}

/// The device descriptor fields this library actually inspects.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Events the transport delivers as the bus changes state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UsbEvent {
    /// The host role changed; `is_host` reflects the new state.
    RoleChanged { is_host: bool },
    /// A device appeared on the bus (not yet configured/enabled).
    DeviceConnected { handle: DeviceHandle },
    /// A previously-connected device was disabled (e.g. suspended).
    DeviceDisabled { handle: DeviceHandle },
    /// A device became enabled and ready to be adopted.
    DeviceEnabled { handle: DeviceHandle },
    /// A device left the bus.
    DeviceDisconnected { handle: DeviceHandle },
}

/// Receives events pushed by a [Transport]. Implemented internally by an
/// event queue the [crate::client::Client] drains from its polling entry
/// point; transports should treat this as an opaque sink and never assume
/// anything about what's on the other end beyond "it accepts events".
pub trait EventSink: std::fmt::Debug {
    fn push(&self, event: UsbEvent);
}

/// Shared handle to an [EventSink], cheaply cloned so a transport can retain
/// it for as long as it needs to (e.g. for a background notification thread).
pub type SharedEventSink = Rc<dyn EventSink>;

/// A plain FIFO-backed [EventSink], and the event queue a [crate::client::Client]
/// drains on each call to its polling entry point.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: RefCell<VecDeque<UsbEvent>>,
}

impl EventQueue {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Removes and returns every event queued since the last drain, in order.
    pub fn drain(&self) -> Vec<UsbEvent> {
        self.events.borrow_mut().drain(..).collect()
    }
}

impl EventSink for EventQueue {
    fn push(&self, event: UsbEvent) {
        self.events.borrow_mut().push_back(event);
    }
}

/// Trait that unifies all per-platform USB transports.
///
/// Implementations may contain unsafe code (talking to libusb, IOKit, etc.)
/// but expose a safe interface here, the same split the `usrs` crate's
/// `Backend` trait draws between its trait-object boundary and its
/// platform-specific internals.
pub trait Transport: std::fmt::Debug {
    /// Registers the sink events should be pushed to, and starts whatever
    /// background notification mechanism the platform requires.
    fn init(&mut self, sink: SharedEventSink) -> UsbResult<()>;

    /// Tears down the transport, releasing any OS-level resources.
    fn cleanup(&mut self);

    /// Returns whether the local side currently holds the USB host role.
    fn get_role(&self) -> Role;

    /// Fetches the device descriptor for the given device.
    fn get_device_descriptor(&self, handle: DeviceHandle) -> UsbResult<DeviceDescriptor>;

    /// Fetches the total length (in bytes) of the device's configuration descriptor.
    fn get_config_descriptor_total_length(&self, handle: DeviceHandle) -> UsbResult<u16>;

    /// Selects a USB configuration by index.
    fn set_configuration(&self, handle: DeviceHandle, index: u8) -> UsbResult<()>;

    /// Reads a raw (UTF-16LE, `{bLength, bDescriptorType}`-prefixed) string
    /// descriptor into `buf`, returning the number of bytes written.
    fn get_string_descriptor(
        &self,
        handle: DeviceHandle,
        index: u8,
        buf: &mut [u8],
    ) -> UsbResult<usize>;

    /// Issues a host-to-device control transfer.
    fn control_transfer_out(
        &self,
        handle: DeviceHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> UsbResult<usize>;

    /// Issues a device-to-host control transfer.
    fn control_transfer_in(
        &self,
        handle: DeviceHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> UsbResult<usize>;

    /// Issues a bulk OUT transfer on the given endpoint.
    fn bulk_transfer_out(
        &self,
        handle: DeviceHandle,
        endpoint: u8,
        data: &[u8],
    ) -> UsbResult<usize>;

    /// Requests a bus reset of the given device.
    fn reset_device(&self, handle: DeviceHandle) -> UsbResult<()>;
}
