//! Compute device selection

use candle_core::Device;
use log::{debug, info, warn};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTag {
    Cpu,
    Cuda,
    Metal,
}

impl DeviceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Metal => "metal",
        }
    }

    pub fn of(device: &Device) -> Self {
        match device {
            Device::Cpu => Self::Cpu,
            Device::Cuda(_) => Self::Cuda,
            Device::Metal(_) => Self::Metal,
        }
    }
}

impl fmt::Display for DeviceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryInto<Device> for DeviceTag {
    type Error = candle_core::Error;

    fn try_into(self) -> Result<Device, Self::Error> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda => Device::new_cuda(0),
            Self::Metal => Device::new_metal(0),
        }
    }
}

/// Picks an accelerator when the runtime reports a usable one, the CPU
/// otherwise. Errors while opening an accelerator fall back to the CPU.
pub fn probe_device() -> Device {
    let candidates = [
        (DeviceTag::Cuda, candle_core::utils::cuda_is_available()),
        (DeviceTag::Metal, candle_core::utils::metal_is_available()),
    ];
    for (tag, available) in candidates {
        if !available {
            debug!("{tag} not available");
            continue;
        }
        match TryInto::<Device>::try_into(tag) {
            Ok(device) => return device,
            Err(e) => warn!("{tag} reported available but failed to open: {e}"),
        }
    }
    Device::Cpu
}

static SELECTED_DEVICE: OnceLock<Device> = OnceLock::new();

/// Process-wide device, probed on first call and cached afterwards.
pub fn select_device() -> &'static Device {
    SELECTED_DEVICE.get_or_init(|| {
        let device = probe_device();
        info!("using device: {}", DeviceTag::of(&device));
        device
    })
}
