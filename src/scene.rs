use std::path::Path;
use anyhow::Context;
use glam::{Mat4, Vec3};
use log::info;
use crate::renderer::acceleration_structures::bottom_level_acceleration_structures::BottomLevelAccelerationStructures;
use crate::renderer::acceleration_structures::device::{AccelerationStructureDevice, DeviceBuffer};
use crate::renderer::acceleration_structures::geometry::BottomLevelGeometry;
use crate::renderer::acceleration_structures::instances::{BottomLevelInstanceGroup, InstanceData};
use crate::renderer::acceleration_structures::top_level_acceleration_structures::TopLevelAccelerationStructures;
use crate::renderer::acceleration_structures::AccelerationStructureBuilder;
use crate::renderer::mesh_buffer::{AabbBuffer, MeshBuffer};
use crate::vertex::{Aabb, Vertex};

#[derive(Debug, Clone, PartialEq)]
pub struct SceneMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl SceneMesh {
    pub fn triangle() -> Self {
        Self {
            vertices: vec![
                Vertex::new(Vec3::new(1.0, -1.0, 0.0), Vec3::Z),
                Vertex::new(Vec3::new(0.0, 1.0, 0.0), Vec3::Z),
                Vertex::new(Vec3::new(-1.0, -1.0, 0.0), Vec3::Z),
            ],
            indices: vec![0, 1, 2],
        }
    }

    pub fn load_obj<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<SceneMesh>> {
        let path = path.as_ref();
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
        )
        .with_context(|| format!("loading {}", path.display()))?;

        let meshes: Vec<_> = models
            .into_iter()
            .filter(|model| !model.mesh.indices.is_empty())
            .map(|model| {
                let mesh = model.mesh;
                let vertices = mesh
                    .positions
                    .chunks_exact(3)
                    .enumerate()
                    .map(|(i, position)| {
                        //法線がなければ0にしておく
                        let normal = mesh
                            .normals
                            .get(i * 3..i * 3 + 3)
                            .map_or(Vec3::ZERO, Vec3::from_slice);
                        Vertex::new(Vec3::from_slice(position), normal)
                    })
                    .collect();

                SceneMesh {
                    vertices,
                    indices: mesh.indices,
                }
            })
            .collect();

        info!("{}: {} meshes", path.display(), meshes.len());

        Ok(meshes)
    }
}

pub struct PlacedMesh {
    pub mesh: SceneMesh,
    pub transforms: Vec<Mat4>,
}

pub struct PlacedAabbs {
    pub aabbs: Vec<Aabb>,
    pub transforms: Vec<Mat4>,
}

pub struct Scene<'a, D: AccelerationStructureDevice> {
    //フィールドは宣言順にDropされる: TLAS -> BLAS -> 入力バッファ
    top_level: TopLevelAccelerationStructures<'a, D>,
    bottom_level: BottomLevelAccelerationStructures<'a, D>,
    mesh_buffers: Vec<MeshBuffer<D::Buffer>>,
    aabb_buffers: Vec<AabbBuffer<D::Buffer>>,
}

impl<'a, D: AccelerationStructureDevice> Scene<'a, D> {
    pub fn new(
        builder: &AccelerationStructureBuilder<'a, D>,
        meshes: &[PlacedMesh],
        procedurals: &[PlacedAabbs],
    ) -> anyhow::Result<Self> {
        let device = builder.device();

        let mesh_buffers = meshes
            .iter()
            .map(|placed| MeshBuffer::new(device, &placed.mesh.vertices, &placed.mesh.indices))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let aabb_buffers = procedurals
            .iter()
            .map(|placed| AabbBuffer::new(device, &placed.aabbs))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut geometry_sets = Vec::with_capacity(mesh_buffers.len() + aabb_buffers.len());

        for mesh_buffer in mesh_buffers.iter() {
            let mut geometry = BottomLevelGeometry::new();
            geometry.add_triangle_geometry(&mesh_buffer.triangle_geometry_specification())?;
            geometry_sets.push(geometry);
        }

        for aabb_buffer in aabb_buffers.iter() {
            let mut geometry = BottomLevelGeometry::new();
            geometry.add_bounding_box_geometry(aabb_buffer.aabb_buffer.device_address(), aabb_buffer.aabbs_count)?;
            geometry_sets.push(geometry);
        }

        let bottom_level = builder.build_bottom_level(&geometry_sets)?;

        let transforms = meshes
            .iter()
            .map(|placed| &placed.transforms)
            .chain(procedurals.iter().map(|placed| &placed.transforms));

        let groups: Vec<_> = bottom_level
            .handles()
            .iter()
            .zip(transforms)
            .map(|(handle, transforms)| {
                BottomLevelInstanceGroup::new(
                    *handle,
                    transforms.iter().copied().map(InstanceData::from).collect(),
                )
            })
            .collect();

        let top_level = builder.build_top_level(&groups)?;

        Ok(Self {
            top_level,
            bottom_level,
            mesh_buffers,
            aabb_buffers,
        })
    }

    pub fn top_level(&self) -> &TopLevelAccelerationStructures<'a, D> {
        &self.top_level
    }

    pub fn bottom_level(&self) -> &BottomLevelAccelerationStructures<'a, D> {
        &self.bottom_level
    }

    pub fn mesh_count(&self) -> usize {
        self.mesh_buffers.len()
    }

    pub fn procedural_count(&self) -> usize {
        self.aabb_buffers.len()
    }
}
