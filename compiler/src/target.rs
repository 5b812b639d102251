// target.rs — Compilation target description
//
// The lowering pass reads three things off the target: whether runtime
// assertions are suppressed, whether memory-sanitizer annotations must be
// emitted around extern stages, and which device APIs a schedule may place
// loops on.

use std::collections::HashSet;

use crate::ir::DeviceApi;

/// Feature flags and device support for one compilation target.
#[derive(Debug, Clone, Default)]
pub struct Target {
    /// Suppress emitted `AssertStmt`s (explicit-bound checks).
    pub no_asserts: bool,
    /// Emit memory-sanitizer annotations around extern stages.
    pub msan: bool,
    /// Device APIs enabled beyond the host.
    pub device_apis: HashSet<DeviceApi>,
}

impl Target {
    /// A plain host target: asserts on, no sanitizer, no devices.
    pub fn host() -> Self {
        Target::default()
    }

    /// Whether a loop may be placed on `api` under this target.
    pub fn supports_device_api(&self, api: DeviceApi) -> bool {
        match api {
            DeviceApi::None | DeviceApi::Host => true,
            other => self.device_apis.contains(&other),
        }
    }

    /// Parse a dash-separated feature string, e.g. `host-msan-cuda`.
    pub fn from_features(s: &str) -> Result<Target, String> {
        let mut t = Target::host();
        for feature in s.split('-').filter(|f| !f.is_empty()) {
            match feature {
                "host" => {}
                "no_asserts" => t.no_asserts = true,
                "msan" => t.msan = true,
                "cuda" => {
                    t.device_apis.insert(DeviceApi::Cuda);
                }
                "opencl" => {
                    t.device_apis.insert(DeviceApi::OpenCl);
                }
                other => return Err(format!("unknown target feature {:?}", other)),
            }
        }
        Ok(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_supports_only_host() {
        let t = Target::host();
        assert!(t.supports_device_api(DeviceApi::None));
        assert!(t.supports_device_api(DeviceApi::Host));
        assert!(!t.supports_device_api(DeviceApi::Cuda));
    }

    #[test]
    fn feature_string_round_trip() {
        let t = Target::from_features("host-msan-cuda-no_asserts").unwrap();
        assert!(t.msan);
        assert!(t.no_asserts);
        assert!(t.supports_device_api(DeviceApi::Cuda));
        assert!(!t.supports_device_api(DeviceApi::OpenCl));
        assert!(Target::from_features("host-avx512").is_err());
    }
}
