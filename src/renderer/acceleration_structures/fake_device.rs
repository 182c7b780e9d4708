use std::cell::{Cell, RefCell};
use std::rc::Rc;
use anyhow::{bail, ensure};
use ash::vk::{AccelerationStructureBuildGeometryInfoKHR, AccelerationStructureBuildRangeInfoKHR, AccelerationStructureBuildSizesInfoKHR, AccelerationStructureGeometryKHR, AccelerationStructureKHR, AccelerationStructureTypeKHR, Buffer, BufferUsageFlags, BuildAccelerationStructureFlagsKHR, BuildAccelerationStructureModeKHR, DeviceAddress, DeviceSize, GeometryTypeKHR, Handle};
use crate::renderer::acceleration_structures::device::{destination_structures, AccelerationStructureDevice, BuildTracker, DeviceBuffer, MemoryLocation};

//わざと256の倍数から16ずらしておく
const BASE_BUFFER_ADDRESS: DeviceAddress = 0x1000_0010;
const BUFFER_ADDRESS_STRIDE: DeviceAddress = 0x0100_0000;
const BASE_STRUCTURE_ADDRESS: DeviceAddress = 0xA000_0000;

type SizeFn = dyn Fn(AccelerationStructureTypeKHR, &[u32]) -> (DeviceSize, DeviceSize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeQuery {
    pub ty: AccelerationStructureTypeKHR,
    pub flags: BuildAccelerationStructureFlagsKHR,
    pub geometry_count: usize,
    pub primitive_counts: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub id: u64,
    pub size: DeviceSize,
    pub usage: BufferUsageFlags,
    pub location: MemoryLocation,
    pub device_address: DeviceAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedStructure {
    pub handle: AccelerationStructureKHR,
    pub ty: AccelerationStructureTypeKHR,
    pub buffer_id: u64,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedBuild {
    pub ty: AccelerationStructureTypeKHR,
    pub mode: BuildAccelerationStructureModeKHR,
    pub flags: BuildAccelerationStructureFlagsKHR,
    pub dst: AccelerationStructureKHR,
    pub scratch_address: DeviceAddress,
    pub geometry_types: Vec<GeometryTypeKHR>,
    pub primitive_counts: Vec<u32>,
    pub instance_addresses: Vec<DeviceAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub fence_id: u64,
    pub builds: Vec<SubmittedBuild>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub buffer_id: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_buffer_id: u64,
    next_structure_id: u64,
    next_fence_id: u64,
    size_queries: Vec<SizeQuery>,
    allocations: Vec<Allocation>,
    released_buffers: Vec<u64>,
    uploads: Vec<Upload>,
    structures: Vec<CreatedStructure>,
    destroyed_structures: Vec<AccelerationStructureKHR>,
    submissions: Vec<Submission>,
    waited_fences: Vec<u64>,
    held_structures: Vec<AccelerationStructureKHR>,
}

pub struct FakeBuffer {
    id: u64,
    size: DeviceSize,
    device_address: DeviceAddress,
    location: MemoryLocation,
    state: Rc<RefCell<FakeState>>,
}

impl DeviceBuffer for FakeBuffer {
    fn raw(&self) -> Buffer {
        Buffer::from_raw(self.id)
    }

    fn size(&self) -> DeviceSize {
        self.size
    }

    fn device_address(&self) -> DeviceAddress {
        self.device_address
    }

    fn store(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        ensure!(self.location == MemoryLocation::CpuToGpu, "buffer {} is not host visible", self.id);
        ensure!(bytes.len() as DeviceSize <= self.size, "store of {} bytes overflows buffer {}", bytes.len(), self.id);

        self.state.borrow_mut().uploads.push(Upload {
            buffer_id: self.id,
            bytes: bytes.to_vec(),
        });

        Ok(())
    }
}

impl Drop for FakeBuffer {
    fn drop(&mut self) {
        self.state.borrow_mut().released_buffers.push(self.id);
    }
}

pub struct FakeFence {
    id: u64,
    structures: Vec<AccelerationStructureKHR>,
}

pub struct FakeDevice {
    sizes: Box<SizeFn>,
    state: Rc<RefCell<FakeState>>,
    tracker: BuildTracker,
    hold_completion: Cell<bool>,
    fail_structure_creation_at: Cell<Option<usize>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::with_sizes(|ty, primitive_counts| {
            let primitives: u64 = primitive_counts.iter().map(|&count| count as u64).sum();

            if ty == AccelerationStructureTypeKHR::TOP_LEVEL {
                (500 + 64 * primitives, 200 + 16 * primitives)
            } else {
                (1000 + 137 * primitives, 300 + 61 * primitives)
            }
        })
    }

    pub fn with_sizes<F>(sizes: F) -> Self
    where
        F: Fn(AccelerationStructureTypeKHR, &[u32]) -> (DeviceSize, DeviceSize) + 'static,
    {
        Self {
            sizes: Box::new(sizes),
            state: Rc::new(RefCell::new(FakeState::default())),
            tracker: BuildTracker::new(),
            hold_completion: Cell::new(false),
            fail_structure_creation_at: Cell::new(None),
        }
    }

    //fenceを待ってもビルドが終わっていない状態を再現する
    pub fn hold_completion(&self) {
        self.hold_completion.set(true);
    }

    pub fn release_completion(&self) {
        self.hold_completion.set(false);
        let held = std::mem::take(&mut self.state.borrow_mut().held_structures);
        self.tracker.completed(&held);
    }

    //n個目(0始まり)の生成を失敗させる
    pub fn fail_structure_creation_at(&self, index: usize) {
        self.fail_structure_creation_at.set(Some(index));
    }

    pub fn create_unbuilt_structure(&self) -> AccelerationStructureKHR {
        let mut state = self.state.borrow_mut();
        state.next_structure_id += 1;
        let handle = AccelerationStructureKHR::from_raw(state.next_structure_id);
        self.tracker.created(handle);
        handle
    }

    pub fn structure_address(handle: AccelerationStructureKHR) -> DeviceAddress {
        BASE_STRUCTURE_ADDRESS + handle.as_raw() * 0x100
    }

    pub fn size_queries(&self) -> Vec<SizeQuery> {
        self.state.borrow().size_queries.clone()
    }

    pub fn allocations(&self) -> Vec<Allocation> {
        self.state.borrow().allocations.clone()
    }

    pub fn released_buffers(&self) -> Vec<u64> {
        self.state.borrow().released_buffers.clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.state.borrow().uploads.clone()
    }

    pub fn structures(&self) -> Vec<CreatedStructure> {
        self.state.borrow().structures.clone()
    }

    pub fn destroyed_structures(&self) -> Vec<AccelerationStructureKHR> {
        self.state.borrow().destroyed_structures.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.borrow().submissions.clone()
    }

    pub fn waited_fences(&self) -> Vec<u64> {
        self.state.borrow().waited_fences.clone()
    }

    pub fn is_built(&self, handle: AccelerationStructureKHR) -> bool {
        self.tracker.is_built(handle)
    }
}

impl AccelerationStructureDevice for FakeDevice {
    type Buffer = FakeBuffer;
    type Fence = FakeFence;

    fn allocate_buffer(
        &self,
        size: DeviceSize,
        usage: BufferUsageFlags,
        location: MemoryLocation,
    ) -> anyhow::Result<Self::Buffer> {
        ensure!(size > 0, "zero sized allocation");

        let mut state = self.state.borrow_mut();
        let id = state.next_buffer_id;
        state.next_buffer_id += 1;

        let device_address = BASE_BUFFER_ADDRESS + id * BUFFER_ADDRESS_STRIDE;

        state.allocations.push(Allocation {
            id,
            size,
            usage,
            location,
            device_address,
        });

        Ok(FakeBuffer {
            id,
            size,
            device_address,
            location,
            state: Rc::clone(&self.state),
        })
    }

    fn query_build_sizes(
        &self,
        ty: AccelerationStructureTypeKHR,
        flags: BuildAccelerationStructureFlagsKHR,
        geometries: &[AccelerationStructureGeometryKHR],
        primitive_counts: &[u32],
    ) -> AccelerationStructureBuildSizesInfoKHR {
        self.state.borrow_mut().size_queries.push(SizeQuery {
            ty,
            flags,
            geometry_count: geometries.len(),
            primitive_counts: primitive_counts.to_vec(),
        });

        let (acceleration_structure_size, build_scratch_size) = (self.sizes)(ty, primitive_counts);

        AccelerationStructureBuildSizesInfoKHR::builder()
            .acceleration_structure_size(acceleration_structure_size)
            .build_scratch_size(build_scratch_size)
            .build()
    }

    fn create_acceleration_structure(
        &self,
        ty: AccelerationStructureTypeKHR,
        buffer: &Self::Buffer,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> anyhow::Result<AccelerationStructureKHR> {
        let mut state = self.state.borrow_mut();

        if self.fail_structure_creation_at.get() == Some(state.structures.len()) {
            bail!("vkCreateAccelerationStructureKHR failed: ERROR_OUT_OF_DEVICE_MEMORY");
        }

        ensure!(offset % 256 == 0, "offset {} is not 256 byte aligned", offset);
        ensure!(offset + size <= buffer.size, "structure [{}, {}) exceeds buffer {}", offset, offset + size, buffer.size);

        state.next_structure_id += 1;
        let handle = AccelerationStructureKHR::from_raw(state.next_structure_id);

        state.structures.push(CreatedStructure {
            handle,
            ty,
            buffer_id: buffer.id,
            offset,
            size,
        });
        self.tracker.created(handle);

        Ok(handle)
    }

    fn destroy_acceleration_structure(&self, acceleration_structure: AccelerationStructureKHR) {
        self.state.borrow_mut().destroyed_structures.push(acceleration_structure);
        self.tracker.destroyed(acceleration_structure);
    }

    fn submit_builds(
        &self,
        build_infos: &[AccelerationStructureBuildGeometryInfoKHR],
        build_range_infos: &[&[AccelerationStructureBuildRangeInfoKHR]],
    ) -> anyhow::Result<Self::Fence> {
        ensure!(build_infos.len() == build_range_infos.len(), "build info and range counts differ");

        let builds = build_infos
            .iter()
            .zip(build_range_infos)
            .map(|(info, ranges)| {
                let geometries = unsafe {
                    std::slice::from_raw_parts(info.p_geometries, info.geometry_count as usize)
                };

                SubmittedBuild {
                    ty: info.ty,
                    mode: info.mode,
                    flags: info.flags,
                    dst: info.dst_acceleration_structure,
                    scratch_address: unsafe { info.scratch_data.device_address },
                    geometry_types: geometries.iter().map(|geometry| geometry.geometry_type).collect(),
                    primitive_counts: ranges.iter().map(|range| range.primitive_count).collect(),
                    instance_addresses: geometries
                        .iter()
                        .filter(|geometry| geometry.geometry_type == GeometryTypeKHR::INSTANCES)
                        .map(|geometry| unsafe { geometry.geometry.instances.data.device_address })
                        .collect(),
                }
            })
            .collect();

        let mut state = self.state.borrow_mut();
        let fence_id = state.next_fence_id;
        state.next_fence_id += 1;
        state.submissions.push(Submission { fence_id, builds });

        Ok(FakeFence {
            id: fence_id,
            structures: destination_structures(build_infos),
        })
    }

    fn wait_for_fence(&self, fence: Self::Fence) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        state.waited_fences.push(fence.id);

        if self.hold_completion.get() {
            state.held_structures.extend(fence.structures);
        } else {
            self.tracker.completed(&fence.structures);
        }

        Ok(())
    }

    fn get_acceleration_structure_device_address(
        &self,
        acceleration_structure: AccelerationStructureKHR,
    ) -> anyhow::Result<DeviceAddress> {
        self.tracker.ensure_built(acceleration_structure)?;

        Ok(Self::structure_address(acceleration_structure))
    }
}
