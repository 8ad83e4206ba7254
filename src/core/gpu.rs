//! GPU capability probe.
//!
//! `GB.GPU.init()` asks for a wgpu adapter and device. Dispatch itself is
//! simulated: once a device exists, `GB.GPU.dispatch` just reports success.
//!
//! Without the `gpu` feature the probe always reports "not supported".

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    pub adapter: String,
    pub backend: String,
}

/// Live device handle kept for the rest of the run.
#[cfg(feature = "gpu")]
pub struct GpuContext {
    _device: wgpu::Device,
    _queue: wgpu::Queue,
    info: GpuInfo,
}

#[cfg(feature = "gpu")]
impl GpuContext {
    /// Blocks until an adapter and device are ready, or returns `None`.
    pub fn new() -> Option<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Goober GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .ok()?;

        let raw = adapter.get_info();
        Some(Self {
            _device: device,
            _queue: queue,
            info: GpuInfo {
                adapter: raw.name,
                backend: format!("{:?}", raw.backend),
            },
        })
    }

    pub fn info(&self) -> &GpuInfo {
        &self.info
    }
}

#[cfg(feature = "gpu")]
pub fn probe() -> Option<GpuInfo> {
    GpuContext::new().map(|ctx| ctx.info().clone())
}

#[cfg(not(feature = "gpu"))]
pub fn probe() -> Option<GpuInfo> {
    None
}
