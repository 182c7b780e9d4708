use std::collections::HashMap;
use anyhow::{ensure, Context};
use ash::vk::{AccelerationStructureKHR, DeviceAddress, GeometryInstanceFlagsKHR};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use crate::constants::INSTANCE_MASK_ALL;
use crate::renderer::acceleration_structures::device::AccelerationStructureDevice;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceData {
    pub transform: Mat4,
}

impl InstanceData {
    pub fn new(transform: Mat4) -> Self {
        Self { transform }
    }

    //4x4の上3行を行優先で並べる(最後の行は[0, 0, 0, 1])
    pub fn transform_rows(&self) -> [f32; 12] {
        let rows = self.transform.transpose().to_cols_array();
        let mut matrix = [0.0; 12];
        matrix.copy_from_slice(&rows[..12]);
        matrix
    }
}

impl From<Mat4> for InstanceData {
    fn from(transform: Mat4) -> Self {
        Self::new(transform)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BottomLevelInstanceGroup {
    pub bottom_level: AccelerationStructureKHR,
    pub instances: Vec<InstanceData>,
}

impl BottomLevelInstanceGroup {
    pub fn new(bottom_level: AccelerationStructureKHR, instances: Vec<InstanceData>) -> Self {
        Self {
            bottom_level,
            instances,
        }
    }
}

//VkAccelerationStructureInstanceKHRと同じレイアウト
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct AccelerationStructureInstance {
    pub transform: [f32; 12],
    pub instance_custom_index_and_mask: u32,
    pub instance_shader_binding_table_record_offset_and_flags: u32,
    pub acceleration_structure_reference: u64,
}

const _: () = assert!(
    std::mem::size_of::<AccelerationStructureInstance>()
        == std::mem::size_of::<ash::vk::AccelerationStructureInstanceKHR>()
);

impl AccelerationStructureInstance {
    pub fn new(
        instance: &InstanceData,
        custom_index: u32,
        acceleration_structure_reference: DeviceAddress,
    ) -> Self {
        Self {
            transform: instance.transform_rows(),
            instance_custom_index_and_mask: pack_24_8(custom_index, INSTANCE_MASK_ALL),
            instance_shader_binding_table_record_offset_and_flags: pack_24_8(
                0,
                GeometryInstanceFlagsKHR::empty().as_raw() as u8,
            ),
            acceleration_structure_reference,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.instance_custom_index_and_mask & 0x00FF_FFFF
    }

    pub fn mask(&self) -> u8 {
        (self.instance_custom_index_and_mask >> 24) as u8
    }
}

//vk::Packed24_8と同じ並び: 下位24bitと上位8bit
fn pack_24_8(low_24: u32, high_8: u8) -> u32 {
    (low_24 & 0x00FF_FFFF) | ((high_8 as u32) << 24)
}

pub fn assemble_instances<D: AccelerationStructureDevice>(
    device: &D,
    groups: &[BottomLevelInstanceGroup],
) -> anyhow::Result<Vec<AccelerationStructureInstance>> {
    ensure!(!groups.is_empty(), "top level build called with no instance groups");

    let mut addresses: HashMap<AccelerationStructureKHR, DeviceAddress> = HashMap::new();
    let mut instances = Vec::with_capacity(groups.iter().map(|group| group.instances.len()).sum());

    for (group_index, group) in groups.iter().enumerate() {
        ensure!(!group.instances.is_empty(), "instance group {} has no placements", group_index);
        ensure!(group_index < (1 << 24), "instance custom index {} does not fit in 24 bits", group_index);

        let address = match addresses.get(&group.bottom_level) {
            Some(address) => *address,
            None => {
                let address = device
                    .get_acceleration_structure_device_address(group.bottom_level)
                    .with_context(|| format!("device address of bottom level structure for instance group {}", group_index))?;
                addresses.insert(group.bottom_level, address);
                address
            }
        };

        instances.extend(
            group
                .instances
                .iter()
                .map(|instance| AccelerationStructureInstance::new(instance, group_index as u32, address)),
        );
    }

    Ok(instances)
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};
    use super::*;

    #[test]
    fn layout_matches_vulkan_instance() {
        assert_eq!(std::mem::size_of::<AccelerationStructureInstance>(), 64);
        assert_eq!(std::mem::align_of::<AccelerationStructureInstance>(), 8);
    }

    #[test]
    fn transform_is_stored_as_three_rows() {
        let transform = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 3.0, 4.0),
            Quat::IDENTITY,
            Vec3::new(10.0, 20.0, 30.0),
        );

        let rows = InstanceData::new(transform).transform_rows();

        assert_eq!(
            rows,
            [
                2.0, 0.0, 0.0, 10.0,
                0.0, 3.0, 0.0, 20.0,
                0.0, 0.0, 4.0, 30.0,
            ]
        );
    }

    #[test]
    fn instance_is_visible_to_all_rays() {
        let instance = AccelerationStructureInstance::new(&InstanceData::new(Mat4::IDENTITY), 5, 0xBEEF00);

        assert_eq!(instance.mask(), 0xFF);
        assert_eq!(instance.custom_index(), 5);
        assert_eq!(instance.instance_shader_binding_table_record_offset_and_flags, 0);
        assert_eq!(instance.acceleration_structure_reference, 0xBEEF00);
    }
}
