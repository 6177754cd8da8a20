// Device transport boundary: opening hardware and pushing pixel frames

use std::ffi::CString;

use hidapi::{HidApi, HidDevice};
use thiserror::Error;
use tracing::debug;

use crate::color::Rgba;
use crate::render::RenderTarget;

/// Feature report ids of the lighting protocol.
mod report {
    /// Identification: magic, protocol version, key count.
    pub const STATUS: u8 = 0x01;
    /// One page of RGB payload.
    pub const PAGE: u8 = 0x02;
    /// Latch the uploaded pages onto the LEDs.
    pub const COMMIT: u8 = 0x03;
}

const PROTOCOL_MAGIC: u8 = 0x4B;
const KEYS_PER_PAGE: usize = 20;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The node exists but does not speak our lighting protocol. Expected
    /// during discovery; never surfaced as a failure.
    #[error("not a compatible device: {0}")]
    NotSupported(String),

    #[error("device I/O error: {0}")]
    Io(String),
}

impl DeviceError {
    /// True for the "not the right kind of device" class that discovery
    /// logs at low severity.
    pub fn is_benign(&self) -> bool {
        matches!(self, DeviceError::NotSupported(_))
    }
}

/// Open transport handle for one device.
pub trait Transport: Send {
    /// Device-reported serial number.
    fn serial(&self) -> &str;

    /// Product name.
    fn name(&self) -> &str;

    /// Number of addressable keys.
    fn key_count(&self) -> usize;

    /// Push a composed frame to the hardware.
    fn flush(&mut self, frame: &RenderTarget) -> Result<(), DeviceError>;
}

/// Open the hidraw-backed transport for a device node.
pub fn open(dev_node: &str) -> Result<Box<dyn Transport>, DeviceError> {
    HidTransport::open(dev_node).map(|t| Box::new(t) as Box<dyn Transport>)
}

/// hidraw transport speaking the feature-report lighting protocol.
pub struct HidTransport {
    device: HidDevice,
    serial: String,
    name: String,
    key_count: usize,
}

impl HidTransport {
    pub fn open(dev_node: &str) -> Result<Self, DeviceError> {
        let api = HidApi::new().map_err(|e| DeviceError::Io(e.to_string()))?;
        let path = CString::new(dev_node)
            .map_err(|_| DeviceError::Io(format!("invalid device node: {dev_node}")))?;
        let device = api
            .open_path(&path)
            .map_err(|e| DeviceError::Io(e.to_string()))?;

        // Devices speaking our protocol answer the status feature report
        // with a magic byte; anything else is simply not ours.
        let mut buf = [0u8; 8];
        buf[0] = report::STATUS;
        let len = device
            .get_feature_report(&mut buf)
            .map_err(|e| DeviceError::NotSupported(format!("no status report: {e}")))?;
        if len < 4 || buf[1] != PROTOCOL_MAGIC {
            return Err(DeviceError::NotSupported(
                "unrecognized status report".to_string(),
            ));
        }
        let version = buf[2];
        let key_count = buf[3] as usize;
        if key_count == 0 {
            return Err(DeviceError::NotSupported(
                "device reports no addressable keys".to_string(),
            ));
        }

        let serial = device
            .get_serial_number_string()
            .ok()
            .flatten()
            .unwrap_or_default();
        let name = device
            .get_product_string()
            .ok()
            .flatten()
            .unwrap_or_else(|| "unknown".to_string());

        debug!(
            "opened {dev_node}: {name}, protocol v{version}, {key_count} keys, serial {serial}"
        );

        Ok(Self {
            device,
            serial,
            name,
            key_count,
        })
    }
}

impl Transport for HidTransport {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn key_count(&self) -> usize {
        self.key_count
    }

    fn flush(&mut self, frame: &RenderTarget) -> Result<(), DeviceError> {
        // 2-byte header + 3 bytes RGB per key.
        let mut page = [0u8; 2 + KEYS_PER_PAGE * 3];
        for (page_index, keys) in frame.as_slice().chunks(KEYS_PER_PAGE).enumerate() {
            page.fill(0);
            page[0] = report::PAGE;
            page[1] = page_index as u8;
            for (i, color) in keys.iter().enumerate() {
                let (r, g, b) = premultiply(*color);
                page[2 + i * 3] = r;
                page[3 + i * 3] = g;
                page[4 + i * 3] = b;
            }
            self.device
                .send_feature_report(&page)
                .map_err(|e| DeviceError::Io(e.to_string()))?;
        }
        self.device
            .send_feature_report(&[report::COMMIT, 0])
            .map_err(|e| DeviceError::Io(e.to_string()))
    }
}

/// Collapse RGBA onto the black key background for hardware that only takes
/// RGB.
fn premultiply(color: Rgba) -> (u8, u8, u8) {
    let scale = |c: u8| (c as u16 * color.a as u16 / 255) as u8;
    (scale(color.r), scale(color.g), scale(color.b))
}
