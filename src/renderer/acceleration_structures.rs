use ash::vk::BuildAccelerationStructureFlagsKHR;
use crate::renderer::acceleration_structures::bottom_level_acceleration_structures::BottomLevelAccelerationStructures;
use crate::renderer::acceleration_structures::device::AccelerationStructureDevice;
use crate::renderer::acceleration_structures::geometry::BottomLevelGeometry;
use crate::renderer::acceleration_structures::instances::BottomLevelInstanceGroup;
use crate::renderer::acceleration_structures::top_level_acceleration_structures::TopLevelAccelerationStructures;

pub mod device;
pub mod vulkan_device;
pub mod geometry;
pub mod build_sizes;
pub mod build_resources;
pub mod bottom_level_acceleration_structures;
pub mod instances;
pub mod top_level_acceleration_structures;
#[cfg(test)]
pub(crate) mod fake_device;

pub struct AccelerationStructureBuilder<'a, D: AccelerationStructureDevice> {
    device: &'a D,
    build_flags: BuildAccelerationStructureFlagsKHR,
}

impl<'a, D: AccelerationStructureDevice> AccelerationStructureBuilder<'a, D> {
    pub fn new(device: &'a D) -> Self {
        Self {
            device,
            build_flags: BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
        }
    }

    pub fn with_build_flags(mut self, build_flags: BuildAccelerationStructureFlagsKHR) -> Self {
        self.build_flags = build_flags;
        self
    }

    pub fn device(&self) -> &'a D {
        self.device
    }

    pub fn build_bottom_level(
        &self,
        geometry_sets: &[BottomLevelGeometry],
    ) -> anyhow::Result<BottomLevelAccelerationStructures<'a, D>> {
        BottomLevelAccelerationStructures::new(self.device, geometry_sets, self.build_flags)
    }

    pub fn build_top_level(
        &self,
        groups: &[BottomLevelInstanceGroup],
    ) -> anyhow::Result<TopLevelAccelerationStructures<'a, D>> {
        TopLevelAccelerationStructures::new(self.device, groups, self.build_flags)
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;
    use super::*;
    use crate::renderer::acceleration_structures::fake_device::FakeDevice;
    use crate::renderer::acceleration_structures::geometry::TriangleGeometrySpecification;
    use crate::renderer::acceleration_structures::instances::InstanceData;

    #[test]
    fn bottom_then_top_level_build() {
        let device = FakeDevice::new();
        let builder = AccelerationStructureBuilder::new(&device)
            .with_build_flags(BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD);

        let mut geometry = BottomLevelGeometry::new();
        geometry
            .add_triangle_geometry(&TriangleGeometrySpecification {
                vertex_address: 0x4000,
                index_address: 0x8000,
                vertices_count: 4,
                indices_count: 6,
                vertex_stride: 24,
            })
            .unwrap();

        let bottom_level = builder.build_bottom_level(&[geometry]).unwrap();
        let top_level = builder
            .build_top_level(&[BottomLevelInstanceGroup::new(
                bottom_level.handles()[0],
                vec![InstanceData::new(Mat4::IDENTITY)],
            )])
            .unwrap();

        let submissions = device.submissions();
        assert_eq!(submissions.len(), 2);
        assert!(submissions
            .iter()
            .flat_map(|submission| submission.builds.iter())
            .all(|build| build.flags == BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD));
        assert_eq!(device.waited_fences().len(), 2);
        assert!(device.is_built(top_level.handle()));
    }

    #[test]
    fn size_queries_use_the_build_flags() {
        let device = FakeDevice::new();
        let build_flags = BuildAccelerationStructureFlagsKHR::ALLOW_COMPACTION
            | BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD;
        let builder = AccelerationStructureBuilder::new(&device).with_build_flags(build_flags);

        let mut geometry = BottomLevelGeometry::new();
        geometry.add_bounding_box_geometry(0xC000, 10).unwrap();

        let bottom_level = builder.build_bottom_level(&[geometry.clone(), geometry]).unwrap();
        builder
            .build_top_level(&[BottomLevelInstanceGroup::new(
                bottom_level.handles()[1],
                vec![InstanceData::new(Mat4::IDENTITY)],
            )])
            .unwrap();

        let queries = device.size_queries();
        assert_eq!(queries.len(), 3);
        assert!(queries.iter().all(|query| query.flags == build_flags));

        let submitted: Vec<_> = device
            .submissions()
            .iter()
            .flat_map(|submission| submission.builds.iter().map(|build| (build.ty, build.flags)))
            .collect();
        let queried: Vec<_> = queries.iter().map(|query| (query.ty, query.flags)).collect();
        assert_eq!(submitted, queried);
    }
}
