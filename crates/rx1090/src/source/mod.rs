pub mod file;
pub mod net;

#[cfg(feature = "rtlsdr")]
pub mod rtlsdr;

/// Unit of delivery for raw IQ buffers: 256 KiB, a multiple of 512 as
/// required by the USB transfer layer
pub const DATA_LEN: usize = 16 * 16384;
