//! The event state machine (§4.1): admission policy and adoption/detach
//! logic driven by events drained from the transport's [EventQueue].

use log::{debug, info};

use crate::device::{is_supported, AttachedDevice, DeviceZone};
use crate::transport::{DeviceHandle, Role, Transport, UsbEvent};

/// Governs which `DeviceEnabled` events result in adoption (§3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// A newly enabled, supported device always displaces whatever's adopted.
    AcceptAll,
    /// A newly enabled device is adopted only if the zone is currently empty.
    AcceptOnlyWhenNone,
    /// At most one device is ever adopted across this client's lifetime.
    OneConnectionLimit,
}

/// Applies a single [UsbEvent] to `zone`, given the current admission policy,
/// the number of devices ever adopted so far (`connection_count`), and the
/// client's own handle (if any is currently adopted).
///
/// Returns the updated connection count (incremented by one iff this call
/// adopted a new device).
pub fn handle_event(
    transport: &dyn Transport,
    zone: &mut DeviceZone,
    policy: AdmissionPolicy,
    connection_count: u64,
    event: UsbEvent,
) -> u64 {
    match event {
        UsbEvent::RoleChanged { is_host } => {
            if !is_host {
                debug!("host role lost, clearing device zone");
                zone.clear();
            }
            connection_count
        }

        UsbEvent::DeviceDisconnected { handle } => {
            if zone.attached().map(|d| d.handle) == Some(handle) {
                debug!("device {handle:?} disconnected");
                zone.clear();
            }
            connection_count
        }

        UsbEvent::DeviceConnected { handle } => {
            if transport.get_role().is_host() {
                let _ = transport.reset_device(handle);
            }
            connection_count
        }

        UsbEvent::DeviceDisabled { handle } => {
            debug!("device {handle:?} disabled");
            connection_count
        }

        UsbEvent::DeviceEnabled { handle } => {
            handle_enabled(transport, zone, policy, connection_count, handle)
        }
    }
}

fn handle_enabled(
    transport: &dyn Transport,
    zone: &mut DeviceZone,
    policy: AdmissionPolicy,
    connection_count: u64,
    handle: DeviceHandle,
) -> u64 {
    if !transport.get_role().is_host() {
        return connection_count;
    }

    if zone.attached().map(|d| d.handle) == Some(handle) {
        // Re-enable of the device we already hold; no state change.
        return connection_count;
    }

    let should_adopt = match policy {
        AdmissionPolicy::AcceptAll => {
            zone.clear();
            true
        }
        AdmissionPolicy::AcceptOnlyWhenNone => !is_usable(zone, transport),
        AdmissionPolicy::OneConnectionLimit => connection_count != 1,
    };

    if !should_adopt {
        return connection_count;
    }

    match adopt(transport, handle) {
        Some(device) => {
            info!("adopted device {handle:?}");
            *zone = DeviceZone::Attached(device);
            connection_count + 1
        }
        None => {
            zone.clear();
            connection_count
        }
    }
}

/// Fetches the device descriptor and checks it against the supported
/// vendor/product list (§4.1's adoption rule).
fn adopt(transport: &dyn Transport, handle: DeviceHandle) -> Option<AttachedDevice> {
    let descriptor = transport.get_device_descriptor(handle).ok()?;
    if !is_supported(&descriptor) {
        return None;
    }
    Some(AttachedDevice::new(handle, descriptor))
}

/// A device zone is "usable" (§4.1) iff it holds a device and the transport
/// still considers the local side the USB host.
pub fn is_usable(zone: &DeviceZone, transport: &dyn Transport) -> bool {
    !zone.is_empty() && transport.get_role().is_host()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::product_id;
    use crate::mock::MockTransport;
    use crate::transport::{DeviceDescriptor, Role};

    fn apple_device(transport: &MockTransport, pid: u16) -> DeviceHandle {
        transport.add_device(DeviceDescriptor { vendor_id: crate::device::APPLE_VENDOR_ID, product_id: pid })
    }

    #[test]
    fn one_connection_limit_adopts_only_first_device() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let a = apple_device(&transport, product_id::DFU);
        let b = apple_device(&transport, product_id::DFU);

        let mut zone = DeviceZone::default();
        let mut count = 0;
        count = handle_event(
            &transport,
            &mut zone,
            AdmissionPolicy::OneConnectionLimit,
            count,
            UsbEvent::DeviceEnabled { handle: a },
        );
        assert_eq!(zone.attached().unwrap().handle, a);
        assert_eq!(count, 1);

        count = handle_event(
            &transport,
            &mut zone,
            AdmissionPolicy::OneConnectionLimit,
            count,
            UsbEvent::DeviceEnabled { handle: b },
        );
        assert_eq!(zone.attached().unwrap().handle, a, "second device must be ignored");
        assert_eq!(count, 1);
    }

    #[test]
    fn accept_all_displaces_current_device() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let a = apple_device(&transport, product_id::DFU);
        let b = apple_device(&transport, product_id::WTF);

        let mut zone = DeviceZone::default();
        let mut count = 0;
        count = handle_event(&transport, &mut zone, AdmissionPolicy::AcceptAll, count, UsbEvent::DeviceEnabled { handle: a });
        assert_eq!(zone.attached().unwrap().handle, a);

        handle_event(&transport, &mut zone, AdmissionPolicy::AcceptAll, count, UsbEvent::DeviceEnabled { handle: b });
        assert_eq!(zone.attached().unwrap().handle, b);
    }

    #[test]
    fn accept_only_when_none_ignores_second_device() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let a = apple_device(&transport, product_id::DFU);
        let b = apple_device(&transport, product_id::WTF);

        let mut zone = DeviceZone::default();
        let mut count = 0;
        count = handle_event(&transport, &mut zone, AdmissionPolicy::AcceptOnlyWhenNone, count, UsbEvent::DeviceEnabled { handle: a });
        handle_event(&transport, &mut zone, AdmissionPolicy::AcceptOnlyWhenNone, count, UsbEvent::DeviceEnabled { handle: b });
        assert_eq!(zone.attached().unwrap().handle, a);
    }

    #[test]
    fn role_change_to_non_host_clears_zone() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let a = apple_device(&transport, product_id::DFU);

        let mut zone = DeviceZone::default();
        let mut count = 0;
        count = handle_event(&transport, &mut zone, AdmissionPolicy::AcceptAll, count, UsbEvent::DeviceEnabled { handle: a });
        assert!(!zone.is_empty());

        handle_event(&transport, &mut zone, AdmissionPolicy::AcceptAll, count, UsbEvent::RoleChanged { is_host: false });
        assert!(zone.is_empty());
    }

    #[test]
    fn disconnect_of_our_device_clears_zone() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let a = apple_device(&transport, product_id::DFU);

        let mut zone = DeviceZone::default();
        let mut count = 0;
        count = handle_event(&transport, &mut zone, AdmissionPolicy::AcceptAll, count, UsbEvent::DeviceEnabled { handle: a });
        handle_event(&transport, &mut zone, AdmissionPolicy::AcceptAll, count, UsbEvent::DeviceDisconnected { handle: a });
        assert!(zone.is_empty());
    }

    #[test]
    fn unsupported_vendor_is_not_adopted() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let handle = transport.add_device(DeviceDescriptor { vendor_id: 0x1234, product_id: product_id::DFU });

        let mut zone = DeviceZone::default();
        handle_event(&transport, &mut zone, AdmissionPolicy::AcceptAll, 0, UsbEvent::DeviceEnabled { handle });
        assert!(zone.is_empty());
    }

    #[test]
    fn non_host_role_ignores_enable() {
        let transport = MockTransport::new();
        transport.set_role(Role::Other);
        let handle = apple_device(&transport, product_id::DFU);

        let mut zone = DeviceZone::default();
        handle_event(&transport, &mut zone, AdmissionPolicy::AcceptAll, 0, UsbEvent::DeviceEnabled { handle });
        assert!(zone.is_empty());
    }
}
