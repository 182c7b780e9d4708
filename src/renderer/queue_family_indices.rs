use ash::Instance;
use ash::vk::{PhysicalDevice, QueueFlags};

pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn new(
        instance: &Instance,
        physical_device: PhysicalDevice,
    ) -> QueueFamilyIndices {
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        //ASのビルドはcomputeでも出来るがレンダラーと同じgraphicsキューに積む
        let graphics_family = queue_families
            .iter()
            .position(|queue| queue.queue_count > 0 && queue.queue_flags.contains(QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        Self {
            graphics_family,
        }
    }
}
