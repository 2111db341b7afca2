// src/gpu.rs
// Process-wide GPU context helpers shared by the compute backend and tests.
// The context is created lazily once; callers that need their own device can
// request a private context and hand it to the calculator instead.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{RangeError, RangeResult};

/// Shared wgpu handles. Fields are `Arc` so backends can hold on to the
/// device and queue independently of where the context itself lives.
pub struct GpuContext {
    pub instance: Arc<wgpu::Instance>,
    pub adapter: Arc<wgpu::Adapter>,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

static CTX: OnceCell<Result<GpuContext, String>> = OnceCell::new();

fn backends_from_env() -> wgpu::Backends {
    use std::env;
    if let Ok(s) = env::var("WGPU_BACKENDS").or_else(|_| env::var("WGPU_BACKEND")) {
        let s_l = s.to_lowercase();
        if s_l.contains("metal") {
            return wgpu::Backends::METAL;
        }
        if s_l.contains("vulkan") {
            return wgpu::Backends::VULKAN;
        }
        if s_l.contains("dx12") {
            return wgpu::Backends::DX12;
        }
        if s_l.contains("gl") {
            return wgpu::Backends::GL;
        }
    }
    wgpu::Backends::all()
}

impl GpuContext {
    /// Request an adapter and device with the crate's baseline limits.
    ///
    /// Fails with `Backend` when no adapter matches or device creation is
    /// refused; the process-wide context uses this too, so the failure text
    /// is the same either way.
    pub fn request(
        backends: wgpu::Backends,
        power: wgpu::PowerPreference,
    ) -> RangeResult<Self> {
        let instance = Arc::new(wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        }));

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: power,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| RangeError::backend("no suitable GPU adapter"))?;

        let info = adapter.get_info();
        log::info!("rangecast GPU context: {} ({:?})", info.name, info.backend);

        let mut limits = adapter.limits();
        let baseline = wgpu::Limits::downlevel_defaults();
        limits = limits.using_resolution(baseline);
        // The range pipeline binds at most four storage buffers per stage.
        let desired_storage_buffers = 4;
        limits.max_storage_buffers_per_shader_stage = limits
            .max_storage_buffers_per_shader_stage
            .max(desired_storage_buffers);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: limits,
                label: Some("rangecast-device"),
            },
            None,
        ))
        .map_err(|e| RangeError::backend(format!("request_device failed: {e}")))?;

        Ok(Self {
            instance,
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

/// The process-wide context, initialised on first use.
///
/// Backend selection honours `WGPU_BACKENDS` / `WGPU_BACKEND`. A machine
/// with no usable adapter reports `Backend` here rather than panicking, so
/// CPU-only callers never pay for the probe and GPU callers can fall back.
pub fn try_ctx() -> RangeResult<&'static GpuContext> {
    CTX.get_or_init(|| {
        GpuContext::request(backends_from_env(), wgpu::PowerPreference::HighPerformance)
            .map_err(|e| e.to_string())
    })
    .as_ref()
    .map_err(|e| RangeError::backend(e))
}
