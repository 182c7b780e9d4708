use anyhow::Context;
use ash::vk::{AccelerationStructureBuildGeometryInfoKHR, AccelerationStructureBuildRangeInfoKHR, AccelerationStructureKHR, AccelerationStructureTypeKHR, BuildAccelerationStructureFlagsKHR, BuildAccelerationStructureModeKHR, DeviceOrHostAddressKHR};
use log::{debug, info};
use crate::renderer::acceleration_structures::build_resources::BuildResources;
use crate::renderer::acceleration_structures::build_sizes::{plan_bottom_level, AccelerationInformation};
use crate::renderer::acceleration_structures::device::AccelerationStructureDevice;
use crate::renderer::acceleration_structures::geometry::BottomLevelGeometry;

/// Dropping it destroys every structure before the storage buffer is released.
pub struct BottomLevelAccelerationStructures<'a, D: AccelerationStructureDevice> {
    device: &'a D,
    handles: Vec<AccelerationStructureKHR>,
    information: Vec<AccelerationInformation>,
    storage_buffer: D::Buffer,
}

impl<'a, D: AccelerationStructureDevice> BottomLevelAccelerationStructures<'a, D> {
    pub fn new(
        device: &'a D,
        geometry_sets: &[BottomLevelGeometry],
        build_flags: BuildAccelerationStructureFlagsKHR,
    ) -> anyhow::Result<Self> {
        let plan = plan_bottom_level(device, geometry_sets, build_flags)?;
        let resources = BuildResources::provision(device, &plan)?;

        let scratch_addresses: Vec<_> = plan
            .information
            .iter()
            .map(|information| resources.scratch_address(information))
            .collect();

        let (storage_buffer, scratch_buffer) = resources.into_parts();

        //途中で失敗してもDropで作成済みのものが破棄される
        let mut structures = Self {
            device,
            handles: Vec::with_capacity(plan.len()),
            information: plan.information,
            storage_buffer,
        };

        for (i, information) in structures.information.iter().enumerate() {
            let handle = device
                .create_acceleration_structure(
                    AccelerationStructureTypeKHR::BOTTOM_LEVEL,
                    &structures.storage_buffer,
                    information.acceleration_offset,
                    information.acceleration_size,
                )
                .with_context(|| format!("vkCreateAccelerationStructureKHR for bottom level structure {}", i))?;

            debug!(
                "bottom level [{}]: {:?} at [{}, {})",
                i,
                handle,
                information.acceleration_offset,
                information.acceleration_offset + information.acceleration_size
            );

            structures.handles.push(handle);
        }

        let build_infos: Vec<_> = geometry_sets
            .iter()
            .zip(structures.handles.iter())
            .zip(scratch_addresses.iter())
            .map(|((geometry, handle), scratch_address)| {
                AccelerationStructureBuildGeometryInfoKHR::builder()
                    .ty(AccelerationStructureTypeKHR::BOTTOM_LEVEL)
                    .flags(build_flags)
                    .mode(BuildAccelerationStructureModeKHR::BUILD)
                    .geometries(geometry.geometries())
                    .dst_acceleration_structure(*handle)
                    .scratch_data(DeviceOrHostAddressKHR {
                        device_address: *scratch_address,
                    })
                    .build()
            })
            .collect();

        let build_range_infos: Vec<&[AccelerationStructureBuildRangeInfoKHR]> = geometry_sets
            .iter()
            .map(|geometry| geometry.build_range_infos())
            .collect();

        let fence = device
            .submit_builds(&build_infos, &build_range_infos)
            .context("submitting bottom level acceleration structure builds")?;

        device
            .wait_for_fence(fence)
            .context("waiting for bottom level acceleration structure builds")?;

        drop(scratch_buffer);

        info!(
            "built {} bottom level acceleration structures ({} bytes)",
            structures.handles.len(),
            structures.information.last().map_or(0, |last| last.acceleration_offset + last.acceleration_size)
        );

        Ok(structures)
    }

    pub fn handles(&self) -> &[AccelerationStructureKHR] {
        &self.handles
    }

    pub fn information(&self) -> &[AccelerationInformation] {
        &self.information
    }

    pub fn storage_buffer(&self) -> &D::Buffer {
        &self.storage_buffer
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<D: AccelerationStructureDevice> Drop for BottomLevelAccelerationStructures<'_, D> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.device.destroy_acceleration_structure(handle);
        }
    }
}
