use anyhow::ensure;
use ash::vk::{AabbPositionsKHR, AccelerationStructureBuildRangeInfoKHR, AccelerationStructureGeometryAabbsDataKHR, AccelerationStructureGeometryDataKHR, AccelerationStructureGeometryKHR, AccelerationStructureGeometryTrianglesDataKHR, DeviceAddress, DeviceOrHostAddressConstKHR, DeviceSize, Format, GeometryTypeKHR, IndexType};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleGeometrySpecification {
    pub vertex_address: DeviceAddress,
    pub index_address: DeviceAddress,
    pub vertices_count: u32,
    pub indices_count: u32,
    pub vertex_stride: DeviceSize,
}

#[derive(Clone, Default)]
pub struct BottomLevelGeometry {
    geometries: Vec<AccelerationStructureGeometryKHR>,
    build_range_infos: Vec<AccelerationStructureBuildRangeInfoKHR>,
}

impl BottomLevelGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_triangle_geometry(&mut self, specification: &TriangleGeometrySpecification) -> anyhow::Result<&mut Self> {
        ensure!(specification.vertices_count > 0, "triangle geometry has no vertices");
        ensure!(specification.indices_count >= 3, "triangle geometry has {} indices, need at least 3", specification.indices_count);

        if specification.indices_count % 3 != 0 {
            warn!(
                "index count {} is not a multiple of 3, trailing indices are ignored",
                specification.indices_count
            );
        }

        let triangles = AccelerationStructureGeometryTrianglesDataKHR::builder()
            .vertex_format(Format::R32G32B32_SFLOAT)
            .vertex_data(DeviceOrHostAddressConstKHR {
                device_address: specification.vertex_address,
            })
            .vertex_stride(specification.vertex_stride)
            .max_vertex(specification.vertices_count - 1)
            .index_type(IndexType::UINT32)
            .index_data(DeviceOrHostAddressConstKHR {
                device_address: specification.index_address,
            })
            .build();

        let geometry = AccelerationStructureGeometryKHR::builder()
            .geometry_type(GeometryTypeKHR::TRIANGLES)
            .geometry(AccelerationStructureGeometryDataKHR { triangles })
            .build();

        self.push(geometry, specification.indices_count / 3);

        Ok(self)
    }

    //aabb_addressにはVkAabbPositionsKHRが隙間なくaabb_count個並んでいる
    pub fn add_bounding_box_geometry(&mut self, aabb_address: DeviceAddress, aabb_count: u32) -> anyhow::Result<&mut Self> {
        ensure!(aabb_count > 0, "bounding box geometry has no boxes");

        let aabbs = AccelerationStructureGeometryAabbsDataKHR::builder()
            .data(DeviceOrHostAddressConstKHR {
                device_address: aabb_address,
            })
            .stride(std::mem::size_of::<AabbPositionsKHR>() as DeviceSize)
            .build();

        let geometry = AccelerationStructureGeometryKHR::builder()
            .geometry_type(GeometryTypeKHR::AABBS)
            .geometry(AccelerationStructureGeometryDataKHR { aabbs })
            .build();

        self.push(geometry, aabb_count);

        Ok(self)
    }

    fn push(&mut self, geometry: AccelerationStructureGeometryKHR, primitive_count: u32) {
        //1つのgeometryの一部だけを使うことはしない
        let build_range_info = AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(primitive_count)
            .primitive_offset(0)
            .first_vertex(0)
            .transform_offset(0)
            .build();

        self.geometries.push(geometry);
        self.build_range_infos.push(build_range_info);
    }

    pub fn geometries(&self) -> &[AccelerationStructureGeometryKHR] {
        &self.geometries
    }

    pub fn build_range_infos(&self) -> &[AccelerationStructureBuildRangeInfoKHR] {
        &self.build_range_infos
    }

    //geometriesと同じ順番
    pub fn primitive_counts(&self) -> Vec<u32> {
        self.build_range_infos
            .iter()
            .map(|range| range.primitive_count)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }
}
