use std::env;
use anyhow::Context;
use glam::{Mat4, Vec3};
use log::info;
use linen::constants::VALIDATION_ENV_VAR;
use linen::renderer::acceleration_structures::vulkan_device::VulkanAccelerationDevice;
use linen::renderer::acceleration_structures::AccelerationStructureBuilder;
use linen::renderer::backends::Backends;
use linen::scene::{PlacedAabbs, PlacedMesh, Scene, SceneMesh};
use linen::vertex::Aabb;

fn main() -> anyhow::Result<()> {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let enable_validation_layer = env::var(VALIDATION_ENV_VAR).map_or(false, |value| value == "1");

    let meshes = match env::args().nth(1) {
        Some(path) => SceneMesh::load_obj(&path)?,
        None => vec![SceneMesh::triangle()],
    };

    let backends = Backends::new(enable_validation_layer).context("device bring-up")?;
    let graphics_queue = backends.create_graphics_queue(0);
    let device = VulkanAccelerationDevice::new(&backends, graphics_queue)?;
    let builder = AccelerationStructureBuilder::new(&device);

    //メッシュは横に並べ、その上に球のAABBを置く
    let placed_meshes: Vec<_> = meshes
        .into_iter()
        .enumerate()
        .map(|(i, mesh)| PlacedMesh {
            mesh,
            transforms: vec![
                Mat4::from_translation(Vec3::new(i as f32 * 3.0, 0.0, 0.0)),
                Mat4::from_translation(Vec3::new(i as f32 * 3.0, 0.0, -3.0)),
            ],
        })
        .collect();

    let spheres = PlacedAabbs {
        aabbs: (0..10)
            .map(|i| Aabb::from_sphere(Vec3::new(i as f32 - 4.5, 2.0, 0.0), 0.4))
            .collect(),
        transforms: vec![Mat4::IDENTITY],
    };

    let scene = Scene::new(&builder, &placed_meshes, &[spheres])?;

    info!(
        "scene ready: {} bottom level structures, top level {:?} with {} instances",
        scene.bottom_level().len(),
        scene.top_level().handle(),
        scene.top_level().instance_count()
    );

    Ok(())
}
