use anyhow::{ensure, Context};
use ash::vk::{AccelerationStructureGeometryKHR, AccelerationStructureTypeKHR, BuildAccelerationStructureFlagsKHR, DeviceSize};
use log::debug;
use crate::constants::ACCELERATION_STRUCTURE_ALIGNMENT;
use crate::renderer::acceleration_structures::device::AccelerationStructureDevice;
use crate::renderer::acceleration_structures::geometry::BottomLevelGeometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccelerationInformation {
    pub acceleration_offset: DeviceSize,
    pub acceleration_size: DeviceSize,
    pub scratch_offset: DeviceSize,
    pub scratch_size: DeviceSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildPlan {
    pub acceleration_total_size: DeviceSize,
    pub scratch_total_size: DeviceSize,
    pub information: Vec<AccelerationInformation>,
}

pub fn align_up(value: DeviceSize, alignment: DeviceSize) -> DeviceSize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

impl BuildPlan {
    pub fn from_sizes<I>(sizes: I) -> Self
    where
        I: IntoIterator<Item = (DeviceSize, DeviceSize)>,
    {
        let mut plan = BuildPlan::default();

        for (acceleration_size, scratch_size) in sizes {
            let acceleration_offset = align_up(plan.acceleration_total_size, ACCELERATION_STRUCTURE_ALIGNMENT);
            let scratch_offset = align_up(plan.scratch_total_size, ACCELERATION_STRUCTURE_ALIGNMENT);

            plan.acceleration_total_size = align_up(
                acceleration_offset + acceleration_size,
                ACCELERATION_STRUCTURE_ALIGNMENT,
            );
            plan.scratch_total_size = align_up(
                scratch_offset + scratch_size,
                ACCELERATION_STRUCTURE_ALIGNMENT,
            );

            plan.information.push(AccelerationInformation {
                acceleration_offset,
                acceleration_size,
                scratch_offset,
                scratch_size,
            });
        }

        plan
    }

    pub fn len(&self) -> usize {
        self.information.len()
    }

    pub fn is_empty(&self) -> bool {
        self.information.is_empty()
    }
}

pub fn plan_bottom_level<D: AccelerationStructureDevice>(
    device: &D,
    geometry_sets: &[BottomLevelGeometry],
    build_flags: BuildAccelerationStructureFlagsKHR,
) -> anyhow::Result<BuildPlan> {
    ensure!(!geometry_sets.is_empty(), "bottom level build called with no geometry sets");

    let mut sizes = Vec::with_capacity(geometry_sets.len());

    for (i, geometry) in geometry_sets.iter().enumerate() {
        ensure!(!geometry.is_empty(), "bottom level geometry set {} has no geometries", i);
        ensure!(
            geometry.geometries().len() == geometry.build_range_infos().len(),
            "bottom level geometry set {} has {} geometries but {} build ranges",
            i,
            geometry.geometries().len(),
            geometry.build_range_infos().len()
        );

        let primitive_counts = geometry.primitive_counts();
        ensure!(
            primitive_counts.iter().all(|&count| count > 0),
            "bottom level geometry set {} has a geometry with zero primitives",
            i
        );

        let size = query_sizes(
            device,
            AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            build_flags,
            geometry.geometries(),
            &primitive_counts,
        )
        .with_context(|| format!("size query for bottom level geometry set {}", i))?;

        sizes.push(size);
    }

    let plan = BuildPlan::from_sizes(sizes);
    log_plan("bottom level", &plan);

    Ok(plan)
}

pub fn plan_top_level<D: AccelerationStructureDevice>(
    device: &D,
    instance_geometry: &AccelerationStructureGeometryKHR,
    instance_count: u32,
    build_flags: BuildAccelerationStructureFlagsKHR,
) -> anyhow::Result<BuildPlan> {
    ensure!(instance_count > 0, "top level build called with no instances");

    let size = query_sizes(
        device,
        AccelerationStructureTypeKHR::TOP_LEVEL,
        build_flags,
        std::slice::from_ref(instance_geometry),
        &[instance_count],
    )
    .context("size query for top level instances")?;

    let plan = BuildPlan::from_sizes([size]);
    log_plan("top level", &plan);

    Ok(plan)
}

fn query_sizes<D: AccelerationStructureDevice>(
    device: &D,
    ty: AccelerationStructureTypeKHR,
    flags: BuildAccelerationStructureFlagsKHR,
    geometries: &[AccelerationStructureGeometryKHR],
    primitive_counts: &[u32],
) -> anyhow::Result<(DeviceSize, DeviceSize)> {
    let size_info = device.query_build_sizes(ty, flags, geometries, primitive_counts);

    //空でないgeometryに対して0が返ってくるのはドライバの異常
    ensure!(
        size_info.acceleration_structure_size > 0 && size_info.build_scratch_size > 0,
        "vkGetAccelerationStructureBuildSizesKHR reported zero size (acceleration: {}, scratch: {})",
        size_info.acceleration_structure_size,
        size_info.build_scratch_size
    );

    Ok((size_info.acceleration_structure_size, size_info.build_scratch_size))
}

fn log_plan(level: &str, plan: &BuildPlan) {
    for (i, information) in plan.information.iter().enumerate() {
        debug!("{} [{}]: {:?}", level, i, information);
    }

    debug!(
        "{}: {} structures, storage {} bytes, scratch {} bytes",
        level,
        plan.len(),
        plan.acceleration_total_size,
        plan.scratch_total_size
    );
}
