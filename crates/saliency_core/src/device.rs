//! Compute device selection.
//!
//! The pipeline runs on one of three backends: the CPU (`NdArray`), an NVIDIA
//! GPU or an Apple GPU (both through `LibTorch`, behind the `backend-tch`
//! feature). Availability is probed at runtime; a requested accelerator that
//! is absent is a fatal [`SaliencyError::DeviceUnavailable`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SaliencyError};

/// Compute device requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Host CPU.
    Cpu,
    /// NVIDIA GPU via CUDA.
    Cuda,
    /// Apple GPU via Metal Performance Shaders.
    Mps,
}

impl DeviceKind {
    /// All recognised device kinds.
    pub const ALL: [DeviceKind; 3] = [DeviceKind::Cpu, DeviceKind::Cuda, DeviceKind::Mps];

    /// Parse a device name (`cpu`, `cuda` or `mps`).
    ///
    /// Unknown names are reported as an unavailable device rather than a
    /// configuration error, matching how the operator experiences them.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "cpu" => Ok(DeviceKind::Cpu),
            "cuda" => Ok(DeviceKind::Cuda),
            "mps" => Ok(DeviceKind::Mps),
            other => Err(SaliencyError::DeviceUnavailable(format!(
                "DEVICE must be one of 'cpu', 'cuda' or 'mps'. Found: '{}'",
                other
            ))),
        }
    }

    /// Lower-case name as accepted by [`DeviceKind::parse`].
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda => "cuda",
            DeviceKind::Mps => "mps",
        }
    }

    /// Check if this is an accelerator.
    pub fn is_gpu(&self) -> bool {
        !matches!(self, DeviceKind::Cpu)
    }

    /// Check if the backend for this device is usable in this process.
    pub fn is_available(&self) -> bool {
        match self {
            DeviceKind::Cpu => cfg!(feature = "backend-ndarray"),
            DeviceKind::Cuda => cuda_available(),
            DeviceKind::Mps => mps_available(),
        }
    }

    /// Fail with [`SaliencyError::DeviceUnavailable`] unless [`is_available`](Self::is_available).
    pub fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            return Ok(());
        }

        let reason = if self.is_gpu() && !cfg!(feature = "backend-tch") {
            "this build does not include the `backend-tch` feature"
        } else if self.is_gpu() {
            "no such accelerator was found at runtime"
        } else {
            "this build does not include the `backend-ndarray` feature"
        };
        Err(SaliencyError::DeviceUnavailable(format!(
            "{} device is not available: {}",
            self, reason
        )))
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "CPU"),
            DeviceKind::Cuda => write!(f, "CUDA"),
            DeviceKind::Mps => write!(f, "MPS"),
        }
    }
}

#[cfg(feature = "backend-tch")]
fn cuda_available() -> bool {
    tch::Cuda::is_available()
}

#[cfg(not(feature = "backend-tch"))]
fn cuda_available() -> bool {
    false
}

#[cfg(feature = "backend-tch")]
fn mps_available() -> bool {
    tch::utils::has_mps()
}

#[cfg(not(feature = "backend-tch"))]
fn mps_available() -> bool {
    false
}

/// Device kinds usable in this process, CPU first.
pub fn available_devices() -> Vec<DeviceKind> {
    DeviceKind::ALL
        .into_iter()
        .filter(DeviceKind::is_available)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_devices() {
        assert_eq!(DeviceKind::parse("cpu").unwrap(), DeviceKind::Cpu);
        assert_eq!(DeviceKind::parse("cuda").unwrap(), DeviceKind::Cuda);
        assert_eq!(DeviceKind::parse(" mps ").unwrap(), DeviceKind::Mps);
    }

    #[test]
    fn test_parse_unknown_device() {
        let err = DeviceKind::parse("tpu").unwrap_err();
        assert!(matches!(err, SaliencyError::DeviceUnavailable(_)));
        assert!(err.to_string().contains("tpu"));
    }

    #[test]
    fn test_cpu_is_available() {
        assert!(DeviceKind::Cpu.ensure_available().is_ok());
        assert_eq!(available_devices().first(), Some(&DeviceKind::Cpu));
    }

    #[cfg(not(feature = "backend-tch"))]
    #[test]
    fn test_accelerators_unavailable_without_tch() {
        for device in [DeviceKind::Cuda, DeviceKind::Mps] {
            let err = device.ensure_available().unwrap_err();
            assert!(matches!(err, SaliencyError::DeviceUnavailable(_)));
        }
    }

    #[test]
    fn test_device_serde() {
        let json = serde_json::to_string(&DeviceKind::Cuda).unwrap();
        assert_eq!(json, "\"cuda\"");
        let decoded: DeviceKind = serde_json::from_str("\"mps\"").unwrap();
        assert_eq!(decoded, DeviceKind::Mps);
    }
}
