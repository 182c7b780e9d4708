use anyhow::{ensure, Context};
use ash::vk::{BufferUsageFlags, DeviceAddress, DeviceSize};
use log::debug;
use crate::constants::ACCELERATION_STRUCTURE_ALIGNMENT;
use crate::renderer::acceleration_structures::build_sizes::{align_up, AccelerationInformation, BuildPlan};
use crate::renderer::acceleration_structures::device::{AccelerationStructureDevice, DeviceBuffer, MemoryLocation};

pub struct BuildResources<B> {
    pub storage_buffer: B,
    pub scratch_buffer: B,
    scratch_address: DeviceAddress,
}

impl<B: DeviceBuffer> BuildResources<B> {
    pub fn provision<D>(device: &D, plan: &BuildPlan) -> anyhow::Result<Self>
    where
        D: AccelerationStructureDevice<Buffer = B>,
    {
        ensure!(
            plan.acceleration_total_size > 0 && plan.scratch_total_size > 0,
            "refusing zero sized acceleration structure allocation (storage: {}, scratch: {})",
            plan.acceleration_total_size,
            plan.scratch_total_size
        );

        let storage_buffer = device
            .allocate_buffer(
                plan.acceleration_total_size,
                BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                    | BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                MemoryLocation::GpuOnly,
            )
            .context("allocating acceleration structure storage buffer")?;

        //アロケータが返すアドレスが256でアラインされているとは限らないので余分に確保する
        let scratch_buffer = device
            .allocate_buffer(
                plan.scratch_total_size + ACCELERATION_STRUCTURE_ALIGNMENT,
                BufferUsageFlags::STORAGE_BUFFER
                    | BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                MemoryLocation::GpuOnly,
            )
            .context("allocating acceleration structure scratch buffer")?;

        let scratch_address = align_up(scratch_buffer.device_address(), ACCELERATION_STRUCTURE_ALIGNMENT);

        debug!(
            "storage buffer: {:?} ({} bytes), scratch buffer: {:?} ({} bytes) at 0x{:x}",
            storage_buffer.raw(),
            storage_buffer.size(),
            scratch_buffer.raw(),
            scratch_buffer.size(),
            scratch_address
        );

        Ok(Self {
            storage_buffer,
            scratch_buffer,
            scratch_address,
        })
    }

    pub fn scratch_address(&self, information: &AccelerationInformation) -> DeviceAddress {
        self.scratch_address + information.scratch_offset
    }

    pub fn scratch_end(&self) -> DeviceAddress {
        self.scratch_buffer.device_address() + self.scratch_buffer.size()
    }

    pub fn storage_size(&self) -> DeviceSize {
        self.storage_buffer.size()
    }

    //scratchはビルド完了まで生かしておくこと
    pub fn into_parts(self) -> (B, B) {
        (self.storage_buffer, self.scratch_buffer)
    }
}
