use anyhow::Context;
use ash::vk::{AccelerationStructureBuildGeometryInfoKHR, AccelerationStructureBuildRangeInfoKHR, AccelerationStructureGeometryDataKHR, AccelerationStructureGeometryInstancesDataKHR, AccelerationStructureGeometryKHR, AccelerationStructureKHR, AccelerationStructureTypeKHR, BufferUsageFlags, BuildAccelerationStructureFlagsKHR, BuildAccelerationStructureModeKHR, DeviceOrHostAddressConstKHR, DeviceOrHostAddressKHR, DeviceSize, GeometryTypeKHR, WriteDescriptorSetAccelerationStructureKHR, WriteDescriptorSetAccelerationStructureKHRBuilder};
use log::{debug, info};
use crate::renderer::acceleration_structures::build_resources::BuildResources;
use crate::renderer::acceleration_structures::build_sizes::{plan_top_level, AccelerationInformation};
use crate::renderer::acceleration_structures::device::{AccelerationStructureDevice, DeviceBuffer, MemoryLocation};
use crate::renderer::acceleration_structures::instances::{assemble_instances, BottomLevelInstanceGroup};

pub struct TopLevelAccelerationStructures<'a, D: AccelerationStructureDevice> {
    device: &'a D,
    top_level_acceleration_structure_khr: AccelerationStructureKHR,
    information: AccelerationInformation,
    instance_count: u32,
    top_level_acceleration_structure_buffer: D::Buffer,
}

impl<'a, D: AccelerationStructureDevice> TopLevelAccelerationStructures<'a, D> {
    /// Every bottom level structure in `groups` must already be built and
    /// waited on.
    pub fn new(
        device: &'a D,
        groups: &[BottomLevelInstanceGroup],
        build_flags: BuildAccelerationStructureFlagsKHR,
    ) -> anyhow::Result<Self> {
        let instances = assemble_instances(device, groups)?;
        let instance_count = instance_count(instances.len())?;
        let instance_bytes: &[u8] = bytemuck::cast_slice(&instances);

        //ビルドが終わるまでの間だけ使う
        let mut instance_buffer = device
            .allocate_buffer(
                instance_bytes.len() as DeviceSize,
                BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
                MemoryLocation::CpuToGpu,
            )
            .context("allocating top level instance buffer")?;

        instance_buffer
            .store(instance_bytes)
            .context("uploading top level instances")?;

        debug!(
            "{} instances uploaded to {:?} at 0x{:x}",
            instance_count,
            instance_buffer.raw(),
            instance_buffer.device_address()
        );

        let instances_data = AccelerationStructureGeometryInstancesDataKHR::builder()
            .array_of_pointers(false)
            .data(DeviceOrHostAddressConstKHR {
                device_address: instance_buffer.device_address(),
            })
            .build();

        let geometry = AccelerationStructureGeometryKHR::builder()
            .geometry_type(GeometryTypeKHR::INSTANCES)
            .geometry(AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            })
            .build();

        let plan = plan_top_level(device, &geometry, instance_count, build_flags)?;
        let resources = BuildResources::provision(device, &plan)?;

        let information = plan.information[0];
        let scratch_address = resources.scratch_address(&information);
        let (top_level_acceleration_structure_buffer, scratch_buffer) = resources.into_parts();

        let mut top_level = Self {
            device,
            top_level_acceleration_structure_khr: AccelerationStructureKHR::null(),
            information,
            instance_count,
            top_level_acceleration_structure_buffer,
        };

        top_level.top_level_acceleration_structure_khr = device
            .create_acceleration_structure(
                AccelerationStructureTypeKHR::TOP_LEVEL,
                &top_level.top_level_acceleration_structure_buffer,
                information.acceleration_offset,
                information.acceleration_size,
            )
            .context("vkCreateAccelerationStructureKHR for top level structure")?;

        let geometries = [geometry];

        let build_info = AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(build_flags)
            .mode(BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .dst_acceleration_structure(top_level.top_level_acceleration_structure_khr)
            .scratch_data(DeviceOrHostAddressKHR {
                device_address: scratch_address,
            })
            .build();

        let build_range_info = AccelerationStructureBuildRangeInfoKHR::builder()
            .first_vertex(0)
            //インスタンスの個数
            .primitive_count(instance_count)
            .primitive_offset(0)
            .transform_offset(0)
            .build();

        let fence = device
            .submit_builds(&[build_info], &[&[build_range_info]])
            .context("submitting top level acceleration structure build")?;

        device
            .wait_for_fence(fence)
            .context("waiting for top level acceleration structure build")?;

        drop(scratch_buffer);
        drop(instance_buffer);

        info!(
            "built top level acceleration structure {:?} with {} instances ({} bytes)",
            top_level.top_level_acceleration_structure_khr,
            instance_count,
            information.acceleration_size
        );

        Ok(top_level)
    }

    pub fn handle(&self) -> AccelerationStructureKHR {
        self.top_level_acceleration_structure_khr
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn information(&self) -> &AccelerationInformation {
        &self.information
    }

    pub fn storage_buffer(&self) -> &D::Buffer {
        &self.top_level_acceleration_structure_buffer
    }

    //WriteDescriptorSetのpush_nextに渡す
    pub fn descriptor_info(&self) -> WriteDescriptorSetAccelerationStructureKHRBuilder<'_> {
        WriteDescriptorSetAccelerationStructureKHR::builder()
            .acceleration_structures(std::slice::from_ref(&self.top_level_acceleration_structure_khr))
    }
}

fn instance_count(len: usize) -> anyhow::Result<u32> {
    u32::try_from(len).with_context(|| format!("{} instances do not fit in a u32 primitive count", len))
}

impl<D: AccelerationStructureDevice> Drop for TopLevelAccelerationStructures<'_, D> {
    fn drop(&mut self) {
        if self.top_level_acceleration_structure_khr != AccelerationStructureKHR::null() {
            self.device
                .destroy_acceleration_structure(self.top_level_acceleration_structure_khr);
        }
    }
}
