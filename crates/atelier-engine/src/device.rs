//! Device and numeric-precision placement.
//!
//! A [`Placement`] is chosen once when the adapter is built and never
//! re-evaluated per call. Automatic selection walks
//! [`Placement::PRIORITY`] and takes the first device the backend reports
//! it can drive.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::backend::GenerationBackend;

/// A compute device a pipeline can be placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
  /// CUDA accelerator by ordinal.
  Cuda(usize),
  /// Apple Metal Performance Shaders.
  Mps,
  Cpu,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
      Device::Mps => f.write_str("mps"),
      Device::Cpu => f.write_str("cpu"),
    }
  }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognised device {0:?} (expected auto, cuda[:N], mps or cpu)")]
pub struct ParseDeviceError(String);

impl FromStr for Device {
  type Err = ParseDeviceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_ascii_lowercase();
    match lower.as_str() {
      "cpu" => Ok(Device::Cpu),
      "mps" | "metal" => Ok(Device::Mps),
      "cuda" => Ok(Device::Cuda(0)),
      other => other
        .strip_prefix("cuda:")
        .and_then(|n| n.parse().ok())
        .map(Device::Cuda)
        .ok_or_else(|| ParseDeviceError(s.to_owned())),
    }
  }
}

impl TryFrom<String> for Device {
  type Error = ParseDeviceError;

  fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<Device> for String {
  fn from(d: Device) -> Self { d.to_string() }
}

/// Floating-point precision a pipeline runs at.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Precision {
  Full,
  Half,
}

/// How the adapter should pick its device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DevicePolicy {
  /// Best available device from [`Placement::PRIORITY`].
  #[default]
  Auto,
  /// Use exactly this device. If the backend cannot drive it, loading fails.
  Force(Device),
}

impl FromStr for DevicePolicy {
  type Err = ParseDeviceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("auto") {
      Ok(DevicePolicy::Auto)
    } else {
      s.parse().map(DevicePolicy::Force)
    }
  }
}

impl TryFrom<String> for DevicePolicy {
  type Error = ParseDeviceError;

  fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<DevicePolicy> for String {
  fn from(p: DevicePolicy) -> Self {
    match p {
      DevicePolicy::Auto => "auto".to_owned(),
      DevicePolicy::Force(device) => device.to_string(),
    }
  }
}

/// The device + precision strategy an adapter is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
  pub device:    Device,
  pub precision: Precision,
}

impl Placement {
  /// Highest throughput first; CPU is always last.
  pub const PRIORITY: [Device; 3] = [Device::Cuda(0), Device::Mps, Device::Cpu];

  /// Resolve `policy` against what `backend` supports.
  ///
  /// `precision` overrides the device default when given.
  pub fn select(
    policy: DevicePolicy,
    precision: Option<Precision>,
    backend: &dyn GenerationBackend,
  ) -> Self {
    let device = match policy {
      DevicePolicy::Force(device) => device,
      DevicePolicy::Auto => Self::PRIORITY
        .into_iter()
        .find(|d| backend.supports(*d))
        .unwrap_or(Device::Cpu),
    };
    Self {
      device,
      precision: precision.unwrap_or_else(|| Self::default_precision(device)),
    }
  }

  /// Half precision on CUDA, full everywhere else.
  pub fn default_precision(device: Device) -> Precision {
    match device {
      Device::Cuda(_) => Precision::Half,
      Device::Mps | Device::Cpu => Precision::Full,
    }
  }
}

impl fmt::Display for Placement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.device, self.precision)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::{BackendError, Pipeline, PipelineKind};

  struct Supports(&'static [Device]);

  impl GenerationBackend for Supports {
    fn name(&self) -> &str { "supports" }

    fn supports(&self, device: Device) -> bool { self.0.contains(&device) }

    fn load(
      &self,
      _kind: PipelineKind,
      _model: &str,
      _placement: Placement,
    ) -> Result<Box<dyn Pipeline>, BackendError> {
      Err(BackendError::Other("not loadable".into()))
    }
  }

  #[test]
  fn parse_devices() {
    assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
    assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda(0));
    assert_eq!("cuda:3".parse::<Device>().unwrap(), Device::Cuda(3));
    assert_eq!("metal".parse::<Device>().unwrap(), Device::Mps);
    assert!("tpu".parse::<Device>().is_err());
    assert_eq!("auto".parse::<DevicePolicy>().unwrap(), DevicePolicy::Auto);
  }

  #[test]
  fn auto_prefers_accelerators() {
    let p = Placement::select(
      DevicePolicy::Auto,
      None,
      &Supports(&[Device::Cpu, Device::Cuda(0)]),
    );
    assert_eq!(p, Placement { device: Device::Cuda(0), precision: Precision::Half });

    let p = Placement::select(DevicePolicy::Auto, None, &Supports(&[Device::Mps, Device::Cpu]));
    assert_eq!(p, Placement { device: Device::Mps, precision: Precision::Full });
  }

  #[test]
  fn auto_falls_back_to_cpu() {
    let p = Placement::select(DevicePolicy::Auto, None, &Supports(&[]));
    assert_eq!(p.device, Device::Cpu);
    assert_eq!(p.precision, Precision::Full);
  }

  #[test]
  fn forced_device_and_precision_override() {
    let p = Placement::select(
      DevicePolicy::Force(Device::Cuda(1)),
      Some(Precision::Full),
      &Supports(&[Device::Cpu]),
    );
    assert_eq!(p, Placement { device: Device::Cuda(1), precision: Precision::Full });
  }
}
