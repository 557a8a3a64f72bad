//! Optional GPU backend (spec ch. 4.3; §4.3a of the expanded design).
//!
//! Gated behind the `gpu` feature, off by default, mirroring the teacher's
//! `cuda` feature. With the feature disabled `GpuBackend::probe` always
//! returns `None` and every tensor view is host-only. With it enabled, the
//! backend is a single resident "null device" that always reports
//! `DeviceUnavailable` — real vendor kernel plumbing is out of this core's
//! budget (see DESIGN.md); the point of this module is the fallback
//! contract, not throughput.

use crate::error::GpuError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct GpuConfig {
    pub enabled: bool,
    pub device_id: i32,
    /// -1 means "all layers".
    pub gpu_layers: i32,
    pub moe_optimized: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_id: 0,
            gpu_layers: -1,
            moe_optimized: false,
        }
    }
}

/// Cache key for an uploaded weight buffer: which tensor, which byte range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WeightKey {
    tensor_identity: String,
    byte_offset: u64,
}

/// Stub device-resident buffer handle. Never actually allocated, since the
/// null device never succeeds a real upload.
struct DeviceBuffer;

pub struct GpuBackend {
    device_id: i32,
    moe_optimized: bool,
    weight_cache: Mutex<HashMap<WeightKey, DeviceBuffer>>,
    /// One flag per tensor name, so the fallback warning is logged once.
    warned: Mutex<HashMap<String, AtomicBool>>,
}

impl GpuBackend {
    /// Enumerates devices and picks one. Returns `None` when the `gpu`
    /// feature is compiled out or the config disables the backend.
    pub fn probe(config: &GpuConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        #[cfg(not(feature = "gpu"))]
        {
            tracing::info!("gpu support not compiled in, falling back to cpu-only views");
            None
        }
        #[cfg(feature = "gpu")]
        {
            tracing::info!(device_id = config.device_id, "gpu backend enumerated no usable device");
            Some(Self {
                device_id: config.device_id,
                moe_optimized: config.moe_optimized,
                weight_cache: Mutex::new(HashMap::new()),
                warned: Mutex::new(HashMap::new()),
            })
        }
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    pub fn moe_optimized(&self) -> bool {
        self.moe_optimized
    }

    /// Whether layer `i` should carry a device-backed weight buffer.
    pub fn layer_is_offloaded(&self, layer: usize, gpu_layers: i32) -> bool {
        gpu_layers < 0 || (layer as i32) < gpu_layers
    }

    /// Attempts a device matmul; the null device always fails, so this
    /// always returns `Err`. Logs the fallback notice once per tensor name.
    pub fn matmul(&self, tensor_name: &str, _input: &[f32], _out_rows: usize) -> Result<Vec<f32>, GpuError> {
        self.warn_once(tensor_name);
        Err(GpuError::DeviceUnavailable(format!(
            "device {} has no resident buffer for {tensor_name:?}",
            self.device_id
        )))
    }

    fn warn_once(&self, tensor_name: &str) {
        let mut warned = self.warned.lock().unwrap();
        let flag = warned
            .entry(tensor_name.to_string())
            .or_insert_with(|| AtomicBool::new(false));
        if !flag.swap(true, Ordering::Relaxed) {
            tracing::warn!(tensor = tensor_name, "gpu matmul failed, falling back to cpu");
        }
    }
}
