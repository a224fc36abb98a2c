//! The client façade (§4.7): the single entry point embedding applications
//! construct, configure, poll, and drive uploads/commands through.

use log::{info, warn};

use crate::device::{AttachedDevice, DeviceInfo, DeviceZone, FinalizationState, Mode};
use crate::error::{Error, UsbResult};
use crate::event::{handle_event, AdmissionPolicy};
use crate::identity::{fetch_string_descriptor, parse_identity};
use crate::sleep::{RealSleeper, Sleeper};
use crate::transport::{EventQueue, Transport};
use crate::upload::{self, ProgressCallback, SendOptions};

/// Configuration supplied at construction time; this is the entire
/// configuration surface at the core boundary (§1A: no files/env vars here).
pub struct ClientConfig {
    pub admission_policy: AdmissionPolicy,
    /// Non-zero restricts adoption to devices whose parsed ECID matches.
    pub ecid_restriction: Option<u64>,
    /// Mirrors human-readable diagnostic lines to an embedder-chosen
    /// destination, alongside (not instead of) the `log` facade.
    pub log_sink: Option<Box<dyn Fn(&str)>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            admission_policy: AdmissionPolicy::AcceptAll,
            ecid_restriction: None,
            log_sink: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("admission_policy", &self.admission_policy)
            .field("ecid_restriction", &self.ecid_restriction)
            .field("log_sink", &self.log_sink.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// The process-local handle to a connected bootloader device.
///
/// Owns the transport and the event queue the transport pushes into;
/// `poll()` drains that queue, runs the event state machine, and then runs
/// finalization (§4.2) if a device is adopted and still pending.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    events: std::rc::Rc<EventQueue>,
    zone: DeviceZone,
    connection_count: u64,
    sleeper: Box<dyn Sleeper>,
}

impl Client {
    /// Constructs a client, initializing `transport` with this client's
    /// event queue. Any transport init failure is reported as
    /// [Error::UsbInitFailed] and the transport is not retained.
    pub fn new(config: ClientConfig, mut transport: Box<dyn Transport>) -> UsbResult<Self> {
        let events = EventQueue::new();
        transport.init(events.clone()).map_err(|_| Error::UsbInitFailed)?;

        Ok(Client {
            config,
            transport,
            events,
            zone: DeviceZone::default(),
            connection_count: 0,
            sleeper: Box::new(RealSleeper),
        })
    }

    /// Drains queued transport events, runs the event state machine on each,
    /// then runs finalization if a device is adopted and pending.
    pub fn poll(&mut self) -> UsbResult<()> {
        for event in self.events.drain() {
            self.connection_count = handle_event(
                self.transport.as_ref(),
                &mut self.zone,
                self.config.admission_policy,
                self.connection_count,
                event,
            );
        }

        if let DeviceZone::Attached(device) = &mut self.zone {
            if device.is_pending() {
                finalize(
                    self.transport.as_ref(),
                    device,
                    self.config.ecid_restriction,
                    self.config.log_sink.as_deref(),
                );
            }
        }

        Ok(())
    }

    /// Returns *PWNDFU* if the current device's identity carries a `PWND:`
    /// tag, else its raw product-id mode. `None` if no device is adopted.
    pub fn get_mode(&self) -> Option<Mode> {
        self.zone.attached().map(|d| d.mode())
    }

    /// Translates a [Mode] into one of the legacy display strings.
    pub fn mode_to_str(mode: Mode) -> &'static str {
        mode.as_str()
    }

    /// Returns the current device's parsed identity, if a device is adopted.
    pub fn get_device_info(&self) -> Option<&DeviceInfo> {
        self.zone.attached().map(|d| &d.info)
    }

    /// Returns the currently adopted device, if finalized, for uploads and commands.
    pub fn device(&self) -> Option<&AttachedDevice> {
        self.zone.attached().filter(|d| d.is_finalized())
    }

    fn device_or_err(&self) -> UsbResult<&AttachedDevice> {
        self.device().ok_or(Error::NoDevice)
    }

    /// Uploads `buf` to the current device (§4.5).
    pub fn send_buffer(
        &self,
        buf: &[u8],
        options: SendOptions,
        progress: Option<&mut ProgressCallback>,
    ) -> UsbResult<()> {
        let device = self.device_or_err()?;
        upload::send_buffer(self.transport.as_ref(), device, self.sleeper.as_ref(), buf, options, progress)
    }

    /// Sends a console command, classifying its `bRequest` automatically (§4.6).
    pub fn send_command(&self, cmd: &str) -> UsbResult<()> {
        let device = self.device_or_err()?;
        crate::command::send_command(self.transport.as_ref(), device, cmd)
    }

    /// Sends a console command with an explicit `bRequest`, bypassing the classifier.
    pub fn send_command_breq(&self, cmd: &str, breq: u8) -> UsbResult<()> {
        let device = self.device_or_err()?;
        crate::command::send_command_breq(self.transport.as_ref(), device, cmd, breq)
    }

    pub fn getenv(&self, name: &str) -> UsbResult<String> {
        let device = self.device_or_err()?;
        crate::command::getenv(self.transport.as_ref(), device, name)
    }

    pub fn setenv(&self, name: &str, val: &str) -> UsbResult<()> {
        let device = self.device_or_err()?;
        crate::command::setenv(self.transport.as_ref(), device, name, val)
    }

    pub fn setenvnp(&self, name: &str, val: &str) -> UsbResult<()> {
        let device = self.device_or_err()?;
        crate::command::setenvnp(self.transport.as_ref(), device, name, val)
    }

    pub fn saveenv(&self) -> UsbResult<()> {
        let device = self.device_or_err()?;
        crate::command::saveenv(self.transport.as_ref(), device)
    }

    pub fn reboot(&self) -> UsbResult<()> {
        let device = self.device_or_err()?;
        crate::command::reboot(self.transport.as_ref(), device)
    }

    pub fn getret(&self) -> UsbResult<u8> {
        let device = self.device_or_err()?;
        crate::command::getret(self.transport.as_ref(), device)
    }

    pub fn reset_counters(&self) -> UsbResult<()> {
        let device = self.device_or_err()?;
        crate::command::reset_counters(self.transport.as_ref(), device)
    }

    pub fn finish_transfer(&self) -> UsbResult<()> {
        let device = self.device_or_err()?;
        crate::command::finish_transfer(self.transport.as_ref(), device)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.zone.clear();
        self.transport.cleanup();
    }
}

/// Runs the identification → configuration → finalization sequence (§4.2)
/// for a freshly adopted, pending device. On any non-transient failure the
/// device's finalization state becomes *blocked*, so subsequent polls do not
/// retry until the device detaches and reattaches.
fn finalize(
    transport: &dyn Transport,
    device: &mut AttachedDevice,
    ecid_restriction: Option<u64>,
    log_sink: Option<&dyn Fn(&str)>,
) {
    if let Err(reason) = try_finalize(transport, device, ecid_restriction, log_sink) {
        warn!("finalization failed: {reason}");
        device.finalization = FinalizationState::Blocked { reason };
    }
}

fn try_finalize(
    transport: &dyn Transport,
    device: &mut AttachedDevice,
    ecid_restriction: Option<u64>,
    log_sink: Option<&dyn Fn(&str)>,
) -> UsbResult<()> {
    let serial = fetch_string_descriptor(transport, device.handle, 0, 255)?;
    let mut info = parse_identity(&serial, device.descriptor.product_id);

    if let Some(expected) = ecid_restriction {
        if expected != 0 && info.ecid != expected {
            device.info = DeviceInfo::default();
            return Err(Error::EcidMismatch);
        }
    }

    transport
        .get_config_descriptor_total_length(device.handle)
        .map_err(|_| Error::DescriptorSetFailed)?;
    transport
        .set_configuration(device.handle, 1)
        .map_err(|_| Error::DescriptorSetFailed)?;

    if let Ok(nonce_string) = fetch_string_descriptor(transport, device.handle, 1, 255) {
        if let Some(ap_nonce) = crate::identity::extract_nonce(&nonce_string, "NONC:") {
            info.ap_nonce = ap_nonce;
        }
        if let Some(sep_nonce) = crate::identity::extract_nonce(&nonce_string, "SNON:") {
            info.sep_nonce = sep_nonce;
        }
    }

    device.info = info;
    device.finalization = FinalizationState::Finalized;

    if let Some(sink) = log_sink {
        sink(&format!("finalized device, mode={}", device.mode().as_str()));
    }
    info!("finalized device, mode={}", device.mode().as_str());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::product_id;
    use crate::mock::MockTransport;
    use crate::transport::{DeviceDescriptor, Role, UsbEvent};

    fn identity_descriptor(serial: &str) -> Vec<u8> {
        let units: Vec<u16> = serial.encode_utf16().collect();
        let mut raw = Vec::with_capacity(2 + units.len() * 2);
        raw.push((2 + units.len() * 2) as u8);
        raw.push(3);
        for unit in units {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        raw
    }

    #[test]
    fn poll_adopts_and_finalizes_a_device() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let handle = transport.add_device(DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::DFU,
        });
        transport.set_string_descriptor(handle, 0, identity_descriptor("CPID:8010 ECID:01"));
        transport.set_string_descriptor(handle, 1, identity_descriptor("NONC:aabb SNON:ccdd"));
        transport.push_event(UsbEvent::DeviceEnabled { handle });

        let mut client = Client::new(ClientConfig::default(), Box::new(transport)).unwrap();
        client.poll().unwrap();

        let info = client.get_device_info().unwrap();
        assert_eq!(info.cpid, 0x8010);
        assert_eq!(info.ecid, 0x01);
        assert_eq!(info.ap_nonce, vec![0xAA, 0xBB]);
        assert!(client.device().is_some());
    }

    #[test]
    fn ecid_mismatch_blocks_finalization() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let handle = transport.add_device(DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::DFU,
        });
        transport.set_string_descriptor(handle, 0, identity_descriptor("CPID:8010 ECID:01"));
        transport.push_event(UsbEvent::DeviceEnabled { handle });

        let config = ClientConfig {
            ecid_restriction: Some(0xDEADBEEF),
            ..ClientConfig::default()
        };
        let mut client = Client::new(config, Box::new(transport)).unwrap();
        client.poll().unwrap();

        assert!(client.device().is_none());
        match &client.zone {
            DeviceZone::Attached(device) => {
                assert!(matches!(device.finalization, FinalizationState::Blocked { .. }));
            }
            DeviceZone::Empty => panic!("device should still be attached, just blocked"),
        }

        // A second poll must not retry finalization or change state.
        client.poll().unwrap();
        match &client.zone {
            DeviceZone::Attached(device) => {
                assert!(matches!(device.finalization, FinalizationState::Blocked { .. }));
            }
            DeviceZone::Empty => panic!("device should still be attached"),
        }
    }

    #[test]
    fn no_device_operations_fail_with_no_device() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let client = Client::new(ClientConfig::default(), Box::new(transport)).unwrap();
        assert_eq!(client.send_command("go").unwrap_err().code(), Error::NoDevice.code());
        assert_eq!(client.finish_transfer().unwrap_err().code(), Error::NoDevice.code());
    }

    #[test]
    fn pwndfu_mode_reported_when_pwnd_tag_present() {
        let transport = MockTransport::new();
        transport.set_role(Role::Host);
        let handle = transport.add_device(DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::DFU,
        });
        transport.set_string_descriptor(handle, 0, identity_descriptor("CPID:8010 PWND:[limera1n]"));
        transport.push_event(UsbEvent::DeviceEnabled { handle });

        let mut client = Client::new(ClientConfig::default(), Box::new(transport)).unwrap();
        client.poll().unwrap();

        assert_eq!(client.get_mode(), Some(Mode::PwnDfu));
    }
}
