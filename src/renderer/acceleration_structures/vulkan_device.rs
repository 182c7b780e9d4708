use anyhow::Context;
use ash::extensions::khr::AccelerationStructure;
use ash::vk::{AccelerationStructureBuildGeometryInfoKHR, AccelerationStructureBuildRangeInfoKHR, AccelerationStructureBuildSizesInfoKHR, AccelerationStructureBuildTypeKHR, AccelerationStructureCreateInfoKHR, AccelerationStructureDeviceAddressInfoKHR, AccelerationStructureGeometryKHR, AccelerationStructureKHR, AccelerationStructureTypeKHR, BufferUsageFlags, BuildAccelerationStructureFlagsKHR, BuildAccelerationStructureModeKHR, DeviceAddress, DeviceSize, Queue};
use crate::buffers::Buffers;
use crate::renderer::acceleration_structures::device::{destination_structures, AccelerationStructureDevice, BuildTracker, DeviceBuffer, MemoryLocation};
use crate::renderer::backends::Backends;
use crate::renderer::commands::{Commands, PendingCommands};

pub struct BuildFence {
    pending: PendingCommands,
    structures: Vec<AccelerationStructureKHR>,
}

pub struct VulkanAccelerationDevice<'a> {
    backends: &'a Backends,
    acceleration_structure: AccelerationStructure,
    commands: Commands<'a>,
    graphics_queue: Queue,
    tracker: BuildTracker,
}

impl<'a> VulkanAccelerationDevice<'a> {
    pub fn new(backends: &'a Backends, graphics_queue: Queue) -> anyhow::Result<Self> {
        let acceleration_structure = AccelerationStructure::new(&backends.instance, &backends.device);
        let commands = backends.create_graphics_commands()?;

        Ok(Self {
            backends,
            acceleration_structure,
            commands,
            graphics_queue,
            tracker: BuildTracker::new(),
        })
    }
}

impl<'a> AccelerationStructureDevice for VulkanAccelerationDevice<'a> {
    type Buffer = Buffers<'a>;
    type Fence = BuildFence;

    fn allocate_buffer(
        &self,
        size: DeviceSize,
        usage: BufferUsageFlags,
        location: MemoryLocation,
    ) -> anyhow::Result<Self::Buffer> {
        Buffers::new(
            &self.backends.device,
            &self.backends.device_memory_properties,
            size,
            usage,
            location,
        )
    }

    fn query_build_sizes(
        &self,
        ty: AccelerationStructureTypeKHR,
        flags: BuildAccelerationStructureFlagsKHR,
        geometries: &[AccelerationStructureGeometryKHR],
        primitive_counts: &[u32],
    ) -> AccelerationStructureBuildSizesInfoKHR {
        //サイズ計算にはdst, scratchは不要
        let build_info = AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(ty)
            .flags(flags)
            .mode(BuildAccelerationStructureModeKHR::BUILD)
            .geometries(geometries)
            .build();

        unsafe {
            self.acceleration_structure.get_acceleration_structure_build_sizes(
                AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                //geometriesに対応するように配列を作成する
                primitive_counts,
            )
        }
    }

    fn create_acceleration_structure(
        &self,
        ty: AccelerationStructureTypeKHR,
        buffer: &Self::Buffer,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> anyhow::Result<AccelerationStructureKHR> {
        let create_info = AccelerationStructureCreateInfoKHR::builder()
            .ty(ty)
            .buffer(buffer.raw())
            .offset(offset)
            .size(size)
            .build();

        let handle = unsafe {
            self.acceleration_structure
                .create_acceleration_structure(&create_info, None)
                .context("vkCreateAccelerationStructureKHR")?
        };

        self.tracker.created(handle);

        Ok(handle)
    }

    fn destroy_acceleration_structure(&self, acceleration_structure: AccelerationStructureKHR) {
        self.tracker.destroyed(acceleration_structure);

        unsafe {
            self.acceleration_structure
                .destroy_acceleration_structure(acceleration_structure, None);
        }
    }

    fn submit_builds(
        &self,
        build_infos: &[AccelerationStructureBuildGeometryInfoKHR],
        build_range_infos: &[&[AccelerationStructureBuildRangeInfoKHR]],
    ) -> anyhow::Result<Self::Fence> {
        let pending = self.commands.submit_acceleration_structure_builds(
            &self.acceleration_structure,
            self.graphics_queue,
            build_infos,
            build_range_infos,
        )?;

        Ok(BuildFence {
            pending,
            structures: destination_structures(build_infos),
        })
    }

    fn wait_for_fence(&self, fence: Self::Fence) -> anyhow::Result<()> {
        self.commands.wait(fence.pending)?;
        self.tracker.completed(&fence.structures);

        Ok(())
    }

    fn get_acceleration_structure_device_address(
        &self,
        acceleration_structure: AccelerationStructureKHR,
    ) -> anyhow::Result<DeviceAddress> {
        self.tracker.ensure_built(acceleration_structure)?;

        let address_info = AccelerationStructureDeviceAddressInfoKHR::builder()
            .acceleration_structure(acceleration_structure)
            .build();

        Ok(unsafe {
            self.acceleration_structure
                .get_acceleration_structure_device_address(&address_info)
        })
    }
}
