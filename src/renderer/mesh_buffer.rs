use anyhow::{ensure, Context};
use ash::vk::{BufferUsageFlags, DeviceSize};
use crate::renderer::acceleration_structures::device::{AccelerationStructureDevice, DeviceBuffer, MemoryLocation};
use crate::renderer::acceleration_structures::geometry::TriangleGeometrySpecification;
use crate::vertex::{Aabb, Vertex};

//ASビルドの入力として読まれ、シェーダーからもアドレスで参照する
fn build_input_usage() -> BufferUsageFlags {
    BufferUsageFlags::STORAGE_BUFFER
        | BufferUsageFlags::SHADER_DEVICE_ADDRESS
        | BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
}

fn upload<D: AccelerationStructureDevice>(device: &D, bytes: &[u8], what: &str) -> anyhow::Result<D::Buffer> {
    let mut buffer = device
        .allocate_buffer(bytes.len() as DeviceSize, build_input_usage(), MemoryLocation::CpuToGpu)
        .with_context(|| format!("allocating {} buffer", what))?;

    buffer
        .store(bytes)
        .with_context(|| format!("uploading {} buffer", what))?;

    Ok(buffer)
}

pub struct MeshBuffer<B> {
    pub vertex_stride: DeviceSize,
    pub vertices_count: u32,
    pub indices_count: u32,
    pub vertex_buffer: B,
    pub index_buffer: B,
}

impl<B: DeviceBuffer> MeshBuffer<B> {
    pub fn new<D>(device: &D, vertices: &[Vertex], indices: &[u32]) -> anyhow::Result<Self>
    where
        D: AccelerationStructureDevice<Buffer = B>,
    {
        ensure!(!vertices.is_empty(), "mesh has no vertices");
        ensure!(indices.len() >= 3, "mesh has {} indices", indices.len());

        let vertex_buffer = upload(device, bytemuck::cast_slice(vertices), "vertex")?;
        let index_buffer = upload(device, bytemuck::cast_slice(indices), "index")?;

        Ok(Self {
            vertex_stride: std::mem::size_of::<Vertex>() as DeviceSize,
            vertices_count: vertices.len() as u32,
            indices_count: indices.len() as u32,
            vertex_buffer,
            index_buffer,
        })
    }

    pub fn triangle_geometry_specification(&self) -> TriangleGeometrySpecification {
        TriangleGeometrySpecification {
            vertex_address: self.vertex_buffer.device_address(),
            index_address: self.index_buffer.device_address(),
            vertices_count: self.vertices_count,
            indices_count: self.indices_count,
            vertex_stride: self.vertex_stride,
        }
    }
}

pub struct AabbBuffer<B> {
    pub aabbs_count: u32,
    pub aabb_buffer: B,
}

impl<B: DeviceBuffer> AabbBuffer<B> {
    pub fn new<D>(device: &D, aabbs: &[Aabb]) -> anyhow::Result<Self>
    where
        D: AccelerationStructureDevice<Buffer = B>,
    {
        ensure!(!aabbs.is_empty(), "no bounding boxes to upload");

        let aabb_buffer = upload(device, bytemuck::cast_slice(aabbs), "aabb")?;

        Ok(Self {
            aabbs_count: aabbs.len() as u32,
            aabb_buffer,
        })
    }
}
