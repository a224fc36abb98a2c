//! Every error that can occur while driving a device through this library.
//!
//! The variants mirror the stable numeric taxonomy the original recovery tool
//! exposed at its FFI boundary; [Error::code] maps each variant back to that
//! taxonomy for callers who still need the bare integer (e.g. a CLI built on
//! top of this crate that wants to exit with the legacy status code).

/// Alias to simplify implementing the results of this crate's functions.
pub type UsbResult<T> = Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A null/invalid pointer or handle was supplied where one was required.
    BadPointer,
    /// A client was constructed in a context where another was already active
    /// and the admission policy in effect forbids displacing it.
    ClientAlreadyActive,
    /// An allocation failed.
    OutOfMemory,
    /// The transport could not be initialized for this client.
    UsbInitFailed,
    /// No device is currently attached and usable.
    NoDevice,
    /// A zero-sized destination buffer was supplied to a descriptor decoder.
    DestinationBufferZeroSized,
    /// Fetching a USB descriptor from the device failed.
    DescriptorFetchFailed,
    /// The parsed ECID does not match the restriction the client was constructed with.
    EcidMismatch,
    /// Selecting a USB configuration on the device failed.
    DescriptorSetFailed,
    /// Selecting a USB interface on the device failed.
    InterfaceSetFailed,
    /// A previous finalization attempt for this adoption failed irrecoverably;
    /// no retry will be attempted until the device detaches and reattaches.
    FinalizationBlocked,
    /// A firmware upload failed partway through.
    UsbUploadFailed,
    /// The upload's progress callback returned non-zero, aborting the transfer.
    ///
    /// Collapses to the same [Error::code] as [Error::UsbUploadFailed] for
    /// callers that only understand the legacy numeric taxonomy, which has no
    /// separate "cancelled" code; Rust callers can match on this variant
    /// directly to distinguish a user cancellation from a genuine transport failure.
    UploadCancelled,
    /// The device reported (or this library observed) a DFU status outside
    /// the set this protocol knows how to interpret.
    InvalidUsbStatus,
    /// A console command exceeded the 255-byte payload limit.
    CommandTooLong,
    /// An empty console command was supplied.
    NoCommand,
    /// The requested operation is not available in the device's current mode.
    ServiceNotAvailable,
    /// Resetting the USB device failed.
    UsbResetFailed,
    /// The transport delivered an event kind this library does not recognize.
    UnknownEventType,
}

impl Error {
    /// Returns the stable numeric taxonomy code for this error, matching the
    /// original tool's `irecovery_error_t` values.
    pub fn code(&self) -> i32 {
        use Error::*;

        match self {
            BadPointer => -1,
            ClientAlreadyActive => -2,
            OutOfMemory => -3,
            UsbInitFailed => -4,
            NoDevice => -5,
            DestinationBufferZeroSized => -6,
            DescriptorFetchFailed => -7,
            EcidMismatch => -8,
            DescriptorSetFailed => -9,
            InterfaceSetFailed => -10,
            FinalizationBlocked => -11,
            UsbUploadFailed => -12,
            UploadCancelled => -12,
            InvalidUsbStatus => -13,
            CommandTooLong => -14,
            NoCommand => -15,
            ServiceNotAvailable => -16,
            UsbResetFailed => -17,
            UnknownEventType => -18,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Error::*;

        match self {
            BadPointer => write!(f, "bad pointer"),
            ClientAlreadyActive => write!(f, "a client is already active"),
            OutOfMemory => write!(f, "out of memory"),
            UsbInitFailed => write!(f, "USB init failed"),
            NoDevice => write!(f, "no device"),
            DestinationBufferZeroSized => write!(f, "destination buffer is zero-sized"),
            DescriptorFetchFailed => write!(f, "descriptor fetch failed"),
            EcidMismatch => write!(f, "ECID mismatch"),
            DescriptorSetFailed => write!(f, "descriptor set failed"),
            InterfaceSetFailed => write!(f, "interface set failed"),
            FinalizationBlocked => write!(f, "finalization blocked"),
            UsbUploadFailed => write!(f, "USB upload failed"),
            UploadCancelled => write!(f, "upload cancelled by progress callback"),
            InvalidUsbStatus => write!(f, "invalid USB status"),
            CommandTooLong => write!(f, "command too long"),
            NoCommand => write!(f, "no command"),
            ServiceNotAvailable => write!(f, "service not available"),
            UsbResetFailed => write!(f, "USB reset failed"),
            UnknownEventType => write!(f, "unknown event type"),
        }
    }
}

impl std::error::Error for Error {}
