// src/range/gpu.rs
// wgpu compute backend for the range pipeline: per-pixel kernels over
// device-resident storage buffers, blocking per stage. The CPU module is the
// numeric reference; the kernels reproduce its arithmetic exactly.

use std::path::Path;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::buffer::Buffer;
use crate::camera::Camera;
use crate::error::{RangeError, RangeResult};
use crate::gpu::{self, GpuContext};
use crate::range::{expect_distinct, expect_shape, RangeOptions};
use crate::terrain::Terrain;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
struct Pix2CamParams {
    boresight: [f32; 4],
    dims: [u32; 2],
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
struct Cam2WorldParams {
    dims: [u32; 2],
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
struct MapRangeParams {
    origin: [f32; 3],
    scale: f32,
    bounds: [f32; 2],
    max_range: f32,
    max_error: f32,
    dims: [u32; 2],
    _pad: [u32; 2],
}

/// A host [`Buffer`] paired with a device storage buffer of the same length.
/// Synchronisation is explicit in both directions; nothing is copied
/// implicitly.
pub struct GpuDeviceBuffer {
    host: Buffer,
    device_buffer: wgpu::Buffer,
}

impl GpuDeviceBuffer {
    /// Allocate a zeroed host buffer together with its device mirror.
    pub fn new(
        device: &wgpu::Device,
        rows: u32,
        cols: u32,
        depth: u8,
        label: &str,
    ) -> RangeResult<Self> {
        let host = Buffer::new(rows, cols, depth)?;
        Ok(Self::for_buffer(device, host, label))
    }

    /// Mirror an existing host buffer on the device.
    pub fn for_buffer(device: &wgpu::Device, host: Buffer, label: &str) -> Self {
        let device_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (host.len() * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self { host, device_buffer }
    }

    pub fn host(&self) -> &Buffer {
        &self.host
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.device_buffer
    }

    /// Copy host bytes to the device.
    pub fn to_device(&self, queue: &wgpu::Queue) {
        let guard = self.host.read();
        queue.write_buffer(&self.device_buffer, 0, bytemuck::cast_slice(&guard));
    }

    /// Copy device bytes back into the host buffer (blocking map-read).
    pub fn from_device(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> RangeResult<()> {
        let size = (self.host.len() * std::mem::size_of::<f32>()) as u64;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rangecast-readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_buffer_to_buffer(&self.device_buffer, 0, &staging, 0, size);
        queue.submit(Some(encoder.finish()));

        let (tx, rx) = std::sync::mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| RangeError::backend("readback mapping callback was dropped"))?
            .map_err(|e| RangeError::backend(format!("failed to map readback buffer: {e:?}")))?;

        {
            let mapped = staging.slice(..).get_mapped_range();
            let mut guard = self.host.write();
            guard.copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        staging.unmap();
        Ok(())
    }
}

#[derive(Debug)]
struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// The three named range kernels, compiled once at construction.
///
/// Sources come either from a caller directory (`pix_2_cam_coords.wgsl`,
/// `cam_2_world_coords.wgsl`, `map_range.wgsl`) or from the copies embedded
/// in the crate. A kernel that fails validation reports `Backend` with the
/// compiler's log.
#[derive(Debug)]
pub struct KernelCollection {
    pix2cam: KernelPipeline,
    cam2world: KernelPipeline,
    map_range: KernelPipeline,
}

impl KernelCollection {
    /// Compile the kernels embedded in the crate.
    pub fn embedded(device: &wgpu::Device) -> RangeResult<Self> {
        Self::from_sources(
            device,
            include_str!("../shaders/pix_2_cam_coords.wgsl"),
            include_str!("../shaders/cam_2_world_coords.wgsl"),
            include_str!("../shaders/map_range.wgsl"),
        )
    }

    /// Compile the kernels from WGSL files in `dir`.
    pub fn from_dir(device: &wgpu::Device, dir: &Path) -> RangeResult<Self> {
        let pix2cam = read_kernel_source(dir, "pix_2_cam_coords.wgsl")?;
        let cam2world = read_kernel_source(dir, "cam_2_world_coords.wgsl")?;
        let map_range = read_kernel_source(dir, "map_range.wgsl")?;
        Self::from_sources(device, &pix2cam, &cam2world, &map_range)
    }

    fn from_sources(
        device: &wgpu::Device,
        pix2cam_src: &str,
        cam2world_src: &str,
        map_range_src: &str,
    ) -> RangeResult<Self> {
        let pix2cam = build_kernel(
            device,
            "pix2cam",
            pix2cam_src,
            &[uniform_entry(0), storage_entry(1, false)],
        )?;
        let cam2world = build_kernel(
            device,
            "cam2world",
            cam2world_src,
            &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        )?;
        let map_range = build_kernel(
            device,
            "map_range",
            map_range_src,
            &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        )?;

        Ok(Self { pix2cam, cam2world, map_range })
    }
}

fn read_kernel_source(dir: &Path, file: &str) -> RangeResult<String> {
    let path = dir.join(file);
    std::fs::read_to_string(&path).map_err(|e| {
        RangeError::invalid_argument(format!(
            "could not open kernel file at {}: {e}",
            path.display()
        ))
    })
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn build_kernel(
    device: &wgpu::Device,
    name: &str,
    source: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> RangeResult<KernelPipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(name),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(name),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(name),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: name,
    });

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(RangeError::backend(format!(
            "kernel `{name}` failed to build: {err}"
        )));
    }

    log::debug!("compiled kernel `{name}`");
    Ok(KernelPipeline { pipeline, layout })
}

/// GPU range calculator.
///
/// Stage entry points stage their host arguments through transient device
/// buffers and copy the result back; [`GpuRangeCalculator::calculate`] keeps
/// the intermediates device-resident and performs exactly one device-to-host
/// copy at the end.
pub struct GpuRangeCalculator {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    options: RangeOptions,
    kernels: KernelCollection,
    rotation: GpuDeviceBuffer,
    camera_coords: Option<GpuDeviceBuffer>,
    world_coords: Option<GpuDeviceBuffer>,
    terrain_cells: Option<GpuDeviceBuffer>,
}

impl GpuRangeCalculator {
    /// Calculator on the process-wide context with embedded kernels and
    /// default options.
    pub fn new() -> RangeResult<Self> {
        let ctx = gpu::try_ctx()?;
        Self::with_context(ctx, RangeOptions::default())
    }

    /// Calculator on a caller-supplied context with embedded kernels.
    pub fn with_context(ctx: &GpuContext, options: RangeOptions) -> RangeResult<Self> {
        let kernels = KernelCollection::embedded(&ctx.device)?;
        Self::from_parts(ctx, options, kernels)
    }

    /// Calculator whose kernels are compiled from WGSL files in `dir`.
    pub fn with_kernel_dir(
        ctx: &GpuContext,
        options: RangeOptions,
        dir: &Path,
    ) -> RangeResult<Self> {
        let kernels = KernelCollection::from_dir(&ctx.device, dir)?;
        Self::from_parts(ctx, options, kernels)
    }

    fn from_parts(
        ctx: &GpuContext,
        options: RangeOptions,
        kernels: KernelCollection,
    ) -> RangeResult<Self> {
        options.validate()?;
        let rotation = GpuDeviceBuffer::new(&ctx.device, 3, 4, 1, "rangecast-rotation")?;
        Ok(Self {
            device: ctx.device.clone(),
            queue: ctx.queue.clone(),
            options,
            kernels,
            rotation,
            camera_coords: None,
            world_coords: None,
            terrain_cells: None,
        })
    }

    pub fn options(&self) -> &RangeOptions {
        &self.options
    }

    /// See [`crate::range::RangeCalculator::convert_pixel_to_camera_coords`].
    /// The device layout packs each ray as a `vec4`, so `out` must have
    /// depth 4.
    pub fn convert_pixel_to_camera_coords(
        &mut self,
        cam: &Camera,
        out: &Buffer,
    ) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        expect_shape(out, "camera-coordinate", rows, cols, &[4])?;

        let staged = GpuDeviceBuffer::for_buffer(&self.device, out.clone(), "cam-coords");
        self.run_pix2cam(cam, staged.raw())?;
        staged.from_device(&self.device, &self.queue)
    }

    /// See [`crate::range::RangeCalculator::convert_camera_to_world_coords`].
    pub fn convert_camera_to_world_coords(
        &mut self,
        cam: &Camera,
        cam_coords: &Buffer,
        out: &Buffer,
    ) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        expect_shape(cam_coords, "camera-coordinate", rows, cols, &[4])?;
        expect_shape(out, "world-coordinate", rows, cols, &[4])?;
        expect_distinct(cam_coords, out, "the camera-coordinate input")?;

        let input = GpuDeviceBuffer::for_buffer(&self.device, cam_coords.clone(), "cam-coords");
        input.to_device(&self.queue);
        let staged = GpuDeviceBuffer::for_buffer(&self.device, out.clone(), "world-coords");

        self.run_cam2world(cam, input.raw(), staged.raw(), rows, cols)?;
        staged.from_device(&self.device, &self.queue)
    }

    /// See [`crate::range::RangeCalculator::compute_range`].
    pub fn compute_range(
        &mut self,
        cam: &Camera,
        terrain: &Terrain,
        world_coords: &Buffer,
        out: &Buffer,
    ) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        expect_shape(world_coords, "world-coordinate", rows, cols, &[4])?;
        expect_shape(out, "range", rows, cols, &[1])?;
        expect_distinct(world_coords, out, "the world-coordinate input")?;
        expect_distinct(terrain.data(), out, "the terrain heightfield")?;

        let rays = GpuDeviceBuffer::for_buffer(&self.device, world_coords.clone(), "world-coords");
        rays.to_device(&self.queue);
        let cells = self.stage_terrain(terrain);
        let staged = GpuDeviceBuffer::for_buffer(&self.device, out.clone(), "ranges");

        let result = self.run_map_range(cam, terrain, cells.raw(), rays.raw(), staged.raw());
        self.terrain_cells = Some(cells);
        result?;

        staged.from_device(&self.device, &self.queue)
    }

    /// All three stages with device-resident intermediates and a single
    /// readback of the range image.
    pub fn calculate(&mut self, cam: &Camera, terrain: &Terrain, out: &Buffer) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        expect_shape(out, "range", rows, cols, &[1])?;
        expect_distinct(terrain.data(), out, "the terrain heightfield")?;

        let cam_coords = take_or_create(
            self.camera_coords.take(),
            &self.device,
            rows as u32,
            cols as u32,
            "cam-coords",
        )?;
        let world_coords = take_or_create(
            self.world_coords.take(),
            &self.device,
            rows as u32,
            cols as u32,
            "world-coords",
        )?;
        let cells = self.stage_terrain(terrain);
        let staged_out = GpuDeviceBuffer::for_buffer(&self.device, out.clone(), "ranges");

        let result = self
            .run_pix2cam(cam, cam_coords.raw())
            .and_then(|_| {
                self.run_cam2world(cam, cam_coords.raw(), world_coords.raw(), rows, cols)
            })
            .and_then(|_| {
                self.run_map_range(cam, terrain, cells.raw(), world_coords.raw(), staged_out.raw())
            });

        self.camera_coords = Some(cam_coords);
        self.world_coords = Some(world_coords);
        self.terrain_cells = Some(cells);
        result?;

        staged_out.from_device(&self.device, &self.queue)
    }

    fn run_pix2cam(&self, cam: &Camera, target: &wgpu::Buffer) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        let params = Pix2CamParams {
            boresight: [rows as f32 / 2.0, cols as f32 / 2.0, cam.focal_length(), 0.0],
            dims: [rows as u32, cols as u32],
            _pad: [0; 2],
        };
        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pix2cam-params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        self.dispatch(
            &self.kernels.pix2cam,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: uniforms.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: target.as_entire_binding() },
            ],
            rows as u32,
            cols as u32,
            "pix2cam",
        )
    }

    fn run_cam2world(
        &self,
        cam: &Camera,
        input: &wgpu::Buffer,
        target: &wgpu::Buffer,
        rows: u16,
        cols: u16,
    ) -> RangeResult<()> {
        cam.write_rotation_matrix(self.rotation.host())?;
        self.rotation.to_device(&self.queue);

        let params = Cam2WorldParams { dims: [rows as u32, cols as u32], _pad: [0; 2] };
        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("cam2world-params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        self.dispatch(
            &self.kernels.cam2world,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: uniforms.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: input.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.rotation.raw().as_entire_binding(),
                },
                wgpu::BindGroupEntry { binding: 3, resource: target.as_entire_binding() },
            ],
            rows as u32,
            cols as u32,
            "cam2world",
        )
    }

    fn run_map_range(
        &self,
        cam: &Camera,
        terrain: &Terrain,
        cells: &wgpu::Buffer,
        rays: &wgpu::Buffer,
        target: &wgpu::Buffer,
    ) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        let (t_rows, t_cols) = terrain.data().size();
        let origin = cam.position();

        let params = MapRangeParams {
            origin: origin.to_array(),
            scale: terrain.scale(),
            bounds: [t_rows as f32, t_cols as f32],
            max_range: self.options.max_range(terrain),
            max_error: self.options.max_error(terrain),
            dims: [rows as u32, cols as u32],
            _pad: [0; 2],
        };
        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("map-range-params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        self.dispatch(
            &self.kernels.map_range,
            &[
                wgpu::BindGroupEntry { binding: 0, resource: uniforms.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: rays.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: cells.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: target.as_entire_binding() },
            ],
            rows as u32,
            cols as u32,
            "map_range",
        )
    }

    fn stage_terrain(&mut self, terrain: &Terrain) -> GpuDeviceBuffer {
        let staged = match self.terrain_cells.take() {
            Some(buf) if buf.host().shares_storage(terrain.data()) => buf,
            _ => GpuDeviceBuffer::for_buffer(&self.device, terrain.data().clone(), "terrain"),
        };
        // Heights may have changed since the last call even when the handle
        // is the same, so the upload is unconditional.
        staged.to_device(&self.queue);
        staged
    }

    /// Blocking per-stage dispatch over an 8x8 workgroup grid.
    fn dispatch(
        &self,
        kernel: &KernelPipeline,
        entries: &[wgpu::BindGroupEntry],
        rows: u32,
        cols: u32,
        label: &str,
    ) -> RangeResult<()> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &kernel.layout,
            entries,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&kernel.pipeline);
            cpass.set_bind_group(0, &bind, &[]);
            cpass.dispatch_workgroups((cols + 7) / 8, (rows + 7) / 8, 1);
        }
        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RangeError::backend(format!(
                "failed to dispatch `{label}`: {err}"
            )));
        }
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}

fn take_or_create(
    slot: Option<GpuDeviceBuffer>,
    device: &wgpu::Device,
    rows: u32,
    cols: u32,
    label: &str,
) -> RangeResult<GpuDeviceBuffer> {
    match slot {
        Some(buf) if buf.host().size() == (rows, cols) => Ok(buf),
        _ => GpuDeviceBuffer::new(device, rows, cols, 4, label),
    }
}
