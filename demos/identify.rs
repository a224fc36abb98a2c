//! Identifies a device over the in-memory mock transport.
//!
//! There's no real platform transport shipped with this crate (§1 non-goals);
//! this example stands in a fake DFU-mode device on [MockTransport] so the
//! client façade can be exercised end to end without hardware.

use iboot_usb::mock::MockTransport;
use iboot_usb::transport::{DeviceDescriptor, Role, UsbEvent};
use iboot_usb::{AdmissionPolicy, Client, ClientConfig};

fn encode_string_descriptor(s: &str) -> Vec<u8> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let mut raw = Vec::with_capacity(2 + units.len() * 2);
    raw.push((2 + units.len() * 2) as u8);
    raw.push(3);
    for unit in units {
        raw.extend_from_slice(&unit.to_le_bytes());
    }
    raw
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let transport = MockTransport::new();
    transport.set_role(Role::Host);
    let handle = transport.add_device(DeviceDescriptor {
        vendor_id: iboot_usb::device::APPLE_VENDOR_ID,
        product_id: iboot_usb::device::product_id::DFU,
    });
    transport.set_string_descriptor(
        handle,
        0,
        encode_string_descriptor("CPID:8010 CPRV:11 BDID:08 ECID:000123456789ABCD SRNM:[F2X]"),
    );
    transport.set_string_descriptor(handle, 1, encode_string_descriptor("NONC:aabb SNON:1122"));
    transport.push_event(UsbEvent::DeviceEnabled { handle });

    let config = ClientConfig {
        admission_policy: AdmissionPolicy::AcceptAll,
        ..Default::default()
    };
    let mut client = Client::new(config, Box::new(transport))?;
    client.poll()?;

    match client.get_mode() {
        Some(mode) => println!("mode: {}", Client::mode_to_str(mode)),
        None => println!("no device attached"),
    }

    if let Some(info) = client.get_device_info() {
        println!(
            "cpid={:04x} ecid={:016x} srnm={}",
            info.cpid, info.ecid, info.srnm
        );
    }

    Ok(())
}
