//! # Compute Device Selection
//!
//! Picks the Candle device the local models (Whisper, the sentence encoder)
//! run on. Detection happens once and is cached; an unavailable GPU
//! preference silently falls back to CPU.

use candle_core::Device;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached best available device to avoid repeated detection
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preference as written in `models.device`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Best available: CUDA, then Metal, then CPU
    #[default]
    Auto,
    Cpu,
    /// Falls back to CPU if no CUDA device is present
    Cuda,
    /// Falls back to CPU if no Metal device is present
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

pub struct DeviceManager;

impl DeviceManager {
    pub fn get_device(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Self::get_best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::cuda().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Self::metal().unwrap_or(Device::Cpu),
        }
    }

    pub fn get_best_device() -> Device {
        BEST_DEVICE.get_or_init(Self::detect_best_device).clone()
    }

    fn detect_best_device() -> Device {
        info!("Detecting best available compute device...");

        if let Some(device) = Self::cuda() {
            info!("Selected CUDA GPU for model inference");
            return device;
        }
        if let Some(device) = Self::metal() {
            info!("Selected Metal GPU for model inference");
            return device;
        }

        info!("Using CPU for model inference (no GPU acceleration available)");
        Device::Cpu
    }

    fn cuda() -> Option<Device> {
        Device::new_cuda(0)
            .map_err(|e| debug!("CUDA not available: {}", e))
            .ok()
    }

    fn metal() -> Option<Device> {
        Device::new_metal(0)
            .map_err(|e| debug!("Metal not available: {}", e))
            .ok()
    }

    /// Short label for logs and the health endpoint
    pub fn get_device_info(device: &Device) -> String {
        match device {
            Device::Cpu => "CPU".to_string(),
            Device::Cuda(_) => "CUDA GPU".to_string(),
            Device::Metal(_) => "Metal GPU".to_string(),
        }
    }

    pub fn get_device_summary() -> DeviceSummary {
        let cuda_available = Self::cuda().is_some();
        let metal_available = Self::metal().is_some();
        DeviceSummary {
            cuda_available,
            metal_available,
            gpu_available: cuda_available || metal_available,
            current_device: Self::get_device_info(&Self::get_best_device()),
        }
    }
}

/// Device availability, as reported by `/api/v1/metrics`
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub cuda_available: bool,
    pub metal_available: bool,
    pub gpu_available: bool,
    pub current_device: String,
}

/// Resolve a `models.device` string, treating unknown values as `auto`
pub fn create_device_from_string(device_str: &str) -> Device {
    match device_str.parse::<DevicePreference>() {
        Ok(preference) => DeviceManager::get_device(preference),
        Err(_) => {
            warn!("Invalid device preference '{}', using auto", device_str);
            DeviceManager::get_best_device()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().is_err());
        assert_eq!(DevicePreference::default(), DevicePreference::Auto);
    }

    #[test]
    fn test_cpu_preference_is_cpu() {
        let device = DeviceManager::get_device(DevicePreference::Cpu);
        assert!(matches!(device, Device::Cpu));
        assert_eq!(DeviceManager::get_device_info(&device), "CPU");
    }

    #[test]
    fn test_unknown_string_falls_back_to_detection() {
        let device = create_device_from_string("quantum");
        assert!(!DeviceManager::get_device_info(&device).is_empty());
    }

    #[test]
    fn test_summary_is_consistent() {
        let summary = DeviceManager::get_device_summary();
        assert_eq!(summary.gpu_available, summary.cuda_available || summary.metal_available);
    }
}
