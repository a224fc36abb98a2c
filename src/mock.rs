//! An in-memory [Transport] used by this crate's own tests and, behind the
//! `mock-transport` feature, by downstream integration tests that want to
//! drive the event state machine or upload engine without real hardware.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{Error, UsbResult};
use crate::transport::{
    DeviceDescriptor, DeviceHandle, EventSink, Role, SharedEventSink, Transport, UsbEvent,
};

#[derive(Debug, Default, Clone)]
struct MockDevice {
    descriptor: DeviceDescriptor,
    /// Decoded `index -> raw UTF-16LE string descriptor bytes`.
    string_descriptors: HashMap<u8, Vec<u8>>,
    config_descriptor_len: u16,
}

/// A fake transport backed by plain Rust collections: devices are registered
/// ahead of time with [MockTransport::add_device], and control/bulk transfers
/// record what was sent so tests can assert on the exact bytes placed "on
/// the wire".
#[derive(Debug, Default)]
pub struct MockTransport {
    role: RefCell<Role>,
    devices: RefCell<HashMap<u64, MockDevice>>,
    next_handle: RefCell<u64>,
    sink: RefCell<Option<SharedEventSink>>,
    control_out_log: RefCell<Vec<(u8, u8, u16, u16, Vec<u8>)>>,
    bulk_out_log: RefCell<Vec<(u8, Vec<u8>)>>,
    reset_count: RefCell<u64>,
    /// Canned GETSTATUS/GETSTATE response bytes, consumed in order.
    control_in_responses: RefCell<HashMap<(u8, u8), Vec<Vec<u8>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport::default()
    }

    pub fn set_role(&self, role: Role) {
        *self.role.borrow_mut() = role;
    }

    /// Registers a new device and returns its handle.
    pub fn add_device(&self, descriptor: DeviceDescriptor) -> DeviceHandle {
        let mut next = self.next_handle.borrow_mut();
        let handle = *next;
        *next += 1;
        self.devices.borrow_mut().insert(
            handle,
            MockDevice {
                descriptor,
                string_descriptors: HashMap::new(),
                config_descriptor_len: 9,
            },
        );
        DeviceHandle(handle)
    }

    /// Sets the raw (already-encoded) string descriptor bytes returned for
    /// `handle`'s descriptor `index`.
    pub fn set_string_descriptor(&self, handle: DeviceHandle, index: u8, raw: Vec<u8>) {
        if let Some(device) = self.devices.borrow_mut().get_mut(&handle.0) {
            device.string_descriptors.insert(index, raw);
        }
    }

    /// Queues a response for the next `control_transfer_in` matching
    /// `(request_type, request)`.
    pub fn queue_control_in_response(&self, request_type: u8, request: u8, response: Vec<u8>) {
        self.control_in_responses
            .borrow_mut()
            .entry((request_type, request))
            .or_default()
            .push(response);
    }

    /// Pushes a [UsbEvent] to whatever sink was registered via [Transport::init].
    pub fn push_event(&self, event: UsbEvent) {
        if let Some(sink) = self.sink.borrow().as_ref() {
            sink.push(event);
        }
    }

    /// Every `(request_type, request, value, index, data)` control-OUT
    /// transfer issued so far, in order.
    pub fn control_out_log(&self) -> Vec<(u8, u8, u16, u16, Vec<u8>)> {
        self.control_out_log.borrow().clone()
    }

    pub fn reset_count(&self) -> u64 {
        *self.reset_count.borrow()
    }

    /// Every `(endpoint, data)` bulk-OUT transfer issued so far, in order.
    pub fn bulk_out_log(&self) -> Vec<(u8, Vec<u8>)> {
        self.bulk_out_log.borrow().clone()
    }
}

impl Transport for MockTransport {
    fn init(&mut self, sink: SharedEventSink) -> UsbResult<()> {
        *self.sink.borrow_mut() = Some(sink);
        Ok(())
    }

    fn cleanup(&mut self) {
        *self.sink.borrow_mut() = None;
    }

    fn get_role(&self) -> Role {
        *self.role.borrow()
    }

    fn get_device_descriptor(&self, handle: DeviceHandle) -> UsbResult<DeviceDescriptor> {
        self.devices
            .borrow()
            .get(&handle.0)
            .map(|d| d.descriptor)
            .ok_or(Error::NoDevice)
    }

    fn get_config_descriptor_total_length(&self, handle: DeviceHandle) -> UsbResult<u16> {
        self.devices
            .borrow()
            .get(&handle.0)
            .map(|d| d.config_descriptor_len)
            .ok_or(Error::DescriptorFetchFailed)
    }

    fn set_configuration(&self, handle: DeviceHandle, _index: u8) -> UsbResult<()> {
        if self.devices.borrow().contains_key(&handle.0) {
            Ok(())
        } else {
            Err(Error::DescriptorSetFailed)
        }
    }

    fn get_string_descriptor(&self, handle: DeviceHandle, index: u8, buf: &mut [u8]) -> UsbResult<usize> {
        let devices = self.devices.borrow();
        let device = devices.get(&handle.0).ok_or(Error::DescriptorFetchFailed)?;
        let raw = device
            .string_descriptors
            .get(&index)
            .ok_or(Error::DescriptorFetchFailed)?;
        let n = raw.len().min(buf.len());
        buf[..n].copy_from_slice(&raw[..n]);
        Ok(n)
    }

    fn control_transfer_out(
        &self,
        handle: DeviceHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> UsbResult<usize> {
        if !self.devices.borrow().contains_key(&handle.0) {
            return Err(Error::NoDevice);
        }
        self.control_out_log
            .borrow_mut()
            .push((request_type, request, value, index, data.to_vec()));
        Ok(data.len())
    }

    fn control_transfer_in(
        &self,
        handle: DeviceHandle,
        request_type: u8,
        request: u8,
        _value: u16,
        _index: u16,
        buf: &mut [u8],
    ) -> UsbResult<usize> {
        if !self.devices.borrow().contains_key(&handle.0) {
            return Err(Error::NoDevice);
        }
        let mut responses = self.control_in_responses.borrow_mut();
        let queue = responses.entry((request_type, request)).or_default();
        let response = if queue.is_empty() {
            Vec::new()
        } else {
            queue.remove(0)
        };
        let n = response.len().min(buf.len());
        buf[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }

    fn bulk_transfer_out(&self, handle: DeviceHandle, endpoint: u8, data: &[u8]) -> UsbResult<usize> {
        if !self.devices.borrow().contains_key(&handle.0) {
            return Err(Error::NoDevice);
        }
        self.bulk_out_log.borrow_mut().push((endpoint, data.to_vec()));
        Ok(data.len())
    }

    fn reset_device(&self, handle: DeviceHandle) -> UsbResult<()> {
        if !self.devices.borrow().contains_key(&handle.0) {
            return Err(Error::UsbResetFailed);
        }
        *self.reset_count.borrow_mut() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_control_out_transfers() {
        let transport = MockTransport::new();
        let handle = transport.add_device(DeviceDescriptor { vendor_id: 0x05AC, product_id: 0x1227 });
        transport.control_transfer_out(handle, 0x21, 1, 0, 0, &[1, 2, 3]).unwrap();
        let log = transport.control_out_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], (0x21, 1, 0, 0, vec![1, 2, 3]));
    }

    #[test]
    fn records_bulk_out_transfers() {
        let transport = MockTransport::new();
        let handle = transport.add_device(DeviceDescriptor { vendor_id: 0x05AC, product_id: 0x1280 });
        transport.bulk_transfer_out(handle, 0x04, &[9, 9]).unwrap();
        transport.bulk_transfer_out(handle, 0x04, &[]).unwrap();
        let log = transport.bulk_out_log();
        assert_eq!(log, vec![(0x04, vec![9, 9]), (0x04, vec![])]);
    }

    #[test]
    fn queued_control_in_responses_are_consumed_in_order() {
        let transport = MockTransport::new();
        let handle = transport.add_device(DeviceDescriptor { vendor_id: 0x05AC, product_id: 0x1227 });
        transport.queue_control_in_response(0xA1, 3, vec![0, 0, 0, 0, 5, 0]);
        let mut buf = [0u8; 6];
        let n = transport.control_transfer_in(handle, 0xA1, 3, 0, 0, &mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(buf[4], 5);
    }
}
