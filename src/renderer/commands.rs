use anyhow::Context;
use ash::Device;
use ash::extensions::khr::AccelerationStructure;
use ash::vk::{AccelerationStructureBuildGeometryInfoKHR, AccelerationStructureBuildRangeInfoKHR, AccessFlags, CommandBuffer, CommandBufferAllocateInfo, CommandBufferBeginInfo, CommandBufferLevel, CommandBufferUsageFlags, CommandPool, CommandPoolCreateFlags, CommandPoolCreateInfo, DependencyFlags, Fence, FenceCreateInfo, MemoryBarrier, PipelineStageFlags, Queue, SubmitInfo};
use log::debug;

pub struct PendingCommands {
    pub command_buffer: CommandBuffer,
    pub fence: Fence,
}

pub struct Commands<'a> {
    device: &'a Device,
    pub command_pool: CommandPool,
}

impl<'a> Commands<'a> {
    pub fn new(device: &'a Device, queue_family_index: u32) -> anyhow::Result<Self> {
        let command_pool = Self::create_command_pool(device, queue_family_index)?;

        Ok(Self {
            device,
            command_pool,
        })
    }

    fn create_command_pool(device: &Device, queue_family_index: u32) -> anyhow::Result<CommandPool> {
        let command_pool_create_info = CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(CommandPoolCreateFlags::TRANSIENT | CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .build();

        unsafe {
            device
                .create_command_pool(&command_pool_create_info, None)
                .context("vkCreateCommandPool")
        }
    }

    fn allocate_command_buffer(&self) -> anyhow::Result<CommandBuffer> {
        let command_buffer_alloc_info = CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(CommandBufferLevel::PRIMARY)
            .command_buffer_count(1)
            .build();

        let command_buffers = unsafe {
            self.device
                .allocate_command_buffers(&command_buffer_alloc_info)
                .context("vkAllocateCommandBuffers")?
        };

        Ok(command_buffers[0])
    }

    pub fn submit_acceleration_structure_builds(
        &self,
        acceleration_structure: &AccelerationStructure,
        queue: Queue,
        build_infos: &[AccelerationStructureBuildGeometryInfoKHR],
        build_range_infos: &[&[AccelerationStructureBuildRangeInfoKHR]],
    ) -> anyhow::Result<PendingCommands> {
        let build_command_buffer = self.allocate_command_buffer()?;

        let recorded = self.record_acceleration_structure_builds(
            build_command_buffer,
            acceleration_structure,
            build_infos,
            build_range_infos,
        );
        free_on_error(recorded, || self.free_command_buffer(build_command_buffer))?;

        self.submit(queue, build_command_buffer)
    }

    fn record_acceleration_structure_builds(
        &self,
        build_command_buffer: CommandBuffer,
        acceleration_structure: &AccelerationStructure,
        build_infos: &[AccelerationStructureBuildGeometryInfoKHR],
        build_range_infos: &[&[AccelerationStructureBuildRangeInfoKHR]],
    ) -> anyhow::Result<()> {
        let begin_info = CommandBufferBeginInfo::builder()
            .flags(CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .build();

        unsafe {
            self.device
                .begin_command_buffer(build_command_buffer, &begin_info)
                .context("vkBeginCommandBuffer")?;

            //ホストから書き込んだ頂点・インスタンスをビルドから読めるようにする
            let input_barrier = MemoryBarrier::builder()
                .src_access_mask(AccessFlags::HOST_WRITE | AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(AccessFlags::ACCELERATION_STRUCTURE_READ_KHR | AccessFlags::SHADER_READ)
                .build();

            self.device.cmd_pipeline_barrier(
                build_command_buffer,
                PipelineStageFlags::HOST | PipelineStageFlags::TRANSFER,
                PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                DependencyFlags::empty(),
                &[input_barrier],
                &[],
                &[],
            );

            acceleration_structure.cmd_build_acceleration_structures(
                build_command_buffer,
                build_infos,
                build_range_infos,
            );

            //ビルド結果を後続のビルド(TLAS)とレイトレーシングシェーダーから見えるようにする
            let output_barrier = MemoryBarrier::builder()
                .src_access_mask(AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
                .dst_access_mask(AccessFlags::ACCELERATION_STRUCTURE_READ_KHR)
                .build();

            self.device.cmd_pipeline_barrier(
                build_command_buffer,
                PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR | PipelineStageFlags::RAY_TRACING_SHADER_KHR,
                DependencyFlags::empty(),
                &[output_barrier],
                &[],
                &[],
            );

            self.device
                .end_command_buffer(build_command_buffer)
                .context("vkEndCommandBuffer")?;
        }

        Ok(())
    }

    fn submit(&self, queue: Queue, command_buffer: CommandBuffer) -> anyhow::Result<PendingCommands> {
        let fence = unsafe {
            self.device
                .create_fence(&FenceCreateInfo::builder().build(), None)
                .context("vkCreateFence")
        };
        let fence = free_on_error(fence, || self.free_command_buffer(command_buffer))?;

        let command_buffers = [command_buffer];
        let submit_infos = [
            SubmitInfo::builder()
                .command_buffers(&command_buffers)
                .build()
        ];

        let submitted = unsafe {
            self.device
                .queue_submit(queue, &submit_infos, fence)
                .context("vkQueueSubmit")
        };
        free_on_error(submitted, || unsafe {
            self.device.destroy_fence(fence, None);
            self.free_command_buffer(command_buffer);
        })?;

        debug!("submitted {:?} with fence {:?}", command_buffer, fence);

        Ok(PendingCommands {
            command_buffer,
            fence,
        })
    }

    pub fn wait(&self, pending: PendingCommands) -> anyhow::Result<()> {
        let result = unsafe {
            self.device.wait_for_fences(&[pending.fence], true, u64::MAX)
        };

        unsafe {
            self.device.destroy_fence(pending.fence, None);
        }
        self.free_command_buffer(pending.command_buffer);

        result.context("vkWaitForFences")?;
        debug!("fence {:?} signaled", pending.fence);

        Ok(())
    }

    fn free_command_buffer(&self, command_buffer: CommandBuffer) {
        unsafe {
            self.device.free_command_buffers(self.command_pool, &[command_buffer]);
        }
    }
}

//失敗した時だけcleanupを呼んでエラーをそのまま返す
fn free_on_error<T>(result: anyhow::Result<T>, cleanup: impl FnOnce()) -> anyhow::Result<T> {
    if result.is_err() {
        cleanup();
    }
    result
}

impl Drop for Commands<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
