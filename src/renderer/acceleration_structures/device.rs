use std::cell::RefCell;
use std::collections::HashSet;
use anyhow::ensure;
use ash::vk::{AccelerationStructureBuildGeometryInfoKHR, AccelerationStructureBuildRangeInfoKHR, AccelerationStructureBuildSizesInfoKHR, AccelerationStructureGeometryKHR, AccelerationStructureKHR, AccelerationStructureTypeKHR, Buffer, BufferUsageFlags, BuildAccelerationStructureFlagsKHR, DeviceAddress, DeviceSize, MemoryPropertyFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    GpuOnly,
    CpuToGpu,
}

impl MemoryLocation {
    pub fn memory_property_flags(self) -> MemoryPropertyFlags {
        match self {
            MemoryLocation::GpuOnly => MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryLocation::CpuToGpu => MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        }
    }

    pub fn is_dedicated(self) -> bool {
        matches!(self, MemoryLocation::GpuOnly)
    }
}

pub trait DeviceBuffer {
    fn raw(&self) -> Buffer;

    fn size(&self) -> DeviceSize;

    fn device_address(&self) -> DeviceAddress;

    /// Copies `bytes` to the start of the buffer. Only valid for `MemoryLocation::CpuToGpu`.
    fn store(&mut self, bytes: &[u8]) -> anyhow::Result<()>;
}

pub trait AccelerationStructureDevice {
    type Buffer: DeviceBuffer;
    type Fence;

    fn allocate_buffer(
        &self,
        size: DeviceSize,
        usage: BufferUsageFlags,
        location: MemoryLocation,
    ) -> anyhow::Result<Self::Buffer>;

    //flagsはビルド時と同じものを渡すこと
    fn query_build_sizes(
        &self,
        ty: AccelerationStructureTypeKHR,
        flags: BuildAccelerationStructureFlagsKHR,
        geometries: &[AccelerationStructureGeometryKHR],
        primitive_counts: &[u32],
    ) -> AccelerationStructureBuildSizesInfoKHR;

    fn create_acceleration_structure(
        &self,
        ty: AccelerationStructureTypeKHR,
        buffer: &Self::Buffer,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> anyhow::Result<AccelerationStructureKHR>;

    fn destroy_acceleration_structure(&self, acceleration_structure: AccelerationStructureKHR);

    fn submit_builds(
        &self,
        build_infos: &[AccelerationStructureBuildGeometryInfoKHR],
        build_range_infos: &[&[AccelerationStructureBuildRangeInfoKHR]],
    ) -> anyhow::Result<Self::Fence>;

    /// Blocks until the submission behind `fence` has finished. No timeout.
    fn wait_for_fence(&self, fence: Self::Fence) -> anyhow::Result<()>;

    /// Fails if the structure has not been built and waited on yet.
    fn get_acceleration_structure_device_address(
        &self,
        acceleration_structure: AccelerationStructureKHR,
    ) -> anyhow::Result<DeviceAddress>;
}

#[derive(Debug, Default)]
pub struct BuildTracker {
    pending: RefCell<HashSet<AccelerationStructureKHR>>,
    built: RefCell<HashSet<AccelerationStructureKHR>>,
}

impl BuildTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self, acceleration_structure: AccelerationStructureKHR) {
        self.pending.borrow_mut().insert(acceleration_structure);
    }

    //fenceを待った後に呼ぶ
    pub fn completed(&self, acceleration_structures: &[AccelerationStructureKHR]) {
        let mut pending = self.pending.borrow_mut();
        let mut built = self.built.borrow_mut();

        for acceleration_structure in acceleration_structures {
            if pending.remove(acceleration_structure) {
                built.insert(*acceleration_structure);
            }
        }
    }

    pub fn destroyed(&self, acceleration_structure: AccelerationStructureKHR) {
        self.pending.borrow_mut().remove(&acceleration_structure);
        self.built.borrow_mut().remove(&acceleration_structure);
    }

    pub fn is_built(&self, acceleration_structure: AccelerationStructureKHR) -> bool {
        self.built.borrow().contains(&acceleration_structure)
    }

    pub fn ensure_built(&self, acceleration_structure: AccelerationStructureKHR) -> anyhow::Result<()> {
        ensure!(
            self.is_built(acceleration_structure),
            "acceleration structure {:?} has no completed build; wait on its build fence before using it",
            acceleration_structure
        );

        Ok(())
    }
}

pub fn destination_structures(
    build_infos: &[AccelerationStructureBuildGeometryInfoKHR],
) -> Vec<AccelerationStructureKHR> {
    build_infos
        .iter()
        .map(|info| info.dst_acceleration_structure)
        .collect()
}
