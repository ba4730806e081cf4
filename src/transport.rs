/// Kind of reset requested from the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Restart the MAC firmware.
    Soft,
    /// Restart into the bootloader.
    ToBootloader,
}

/// Static properties of a transport, reported once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCharacteristics {
    pub driver_version: u32,
    /// Largest single read the transport can satisfy.
    pub max_buffer_size: usize,
    /// Largest packet the transport can carry to the MAC in one write.
    pub max_packet_size: usize,
}

/// Trait for MAC communication backends.
/// Implement this trait for different transports (USB, serial port, etc.)
pub trait MacTransport {
    /// Error type for transport operations
    type Error: std::fmt::Debug;

    /// Write data to the MAC
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Number of bytes ready to be read without blocking (a zero-length read)
    fn bytes_available(&mut self) -> Result<usize, Self::Error>;

    /// Read exactly `buf.len()` bytes; only called once that many are available
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Ask the MAC to finish the current command gracefully
    fn cancel(&mut self) -> Result<(), Self::Error>;

    /// Stop the current command immediately and discard pending data
    fn abort(&mut self) -> Result<(), Self::Error>;

    /// Reset the MAC
    fn reset(&mut self, kind: ResetKind) -> Result<(), Self::Error>;

    fn characteristics(&self) -> TransportCharacteristics;
}
