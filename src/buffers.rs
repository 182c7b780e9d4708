use anyhow::{ensure, Context};
use ash::Device;
use ash::util::Align;
use ash::vk::{Buffer, BufferCreateInfo, BufferDeviceAddressInfo, BufferUsageFlags, DeviceAddress, DeviceMemory, DeviceSize, MemoryAllocateFlags, MemoryAllocateFlagsInfo, MemoryAllocateInfo, MemoryDedicatedAllocateInfo, MemoryMapFlags, PhysicalDeviceMemoryProperties, SharingMode};
use crate::get_memory_type_index;
use crate::renderer::acceleration_structures::device::{DeviceBuffer, MemoryLocation};

pub struct Buffers<'a> {
    device: &'a Device,
    pub buffer: Buffer,
    pub size: DeviceSize,
    pub memory: DeviceMemory,
    location: MemoryLocation,
    device_address: DeviceAddress,
}

impl<'a> Buffers<'a> {
    pub fn new(
        device: &'a Device,
        device_memory_properties: &PhysicalDeviceMemoryProperties,
        size: DeviceSize,
        usage: BufferUsageFlags,
        location: MemoryLocation,
    ) -> anyhow::Result<Self> {
        ensure!(size > 0, "zero sized buffer allocation (usage: {:?})", usage);

        let buffer_info = BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(SharingMode::EXCLUSIVE)
            .build();

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None).context("vkCreateBuffer")?
        };

        //メモリサイズやアライメントなどの確保に必要な情報を持つ構造体
        let memory_requirements = unsafe {
            device.get_buffer_memory_requirements(buffer)
        };

        let memory_type_index = match get_memory_type_index(
            device_memory_properties,
            memory_requirements.memory_type_bits,
            location.memory_property_flags(),
        ) {
            Some(index) => index,
            None => {
                unsafe { device.destroy_buffer(buffer, None) };
                anyhow::bail!("no memory type for {:?} (type bits: {:#b})", location, memory_requirements.memory_type_bits);
            }
        };

        //SHADER_DEVICE_ADDRESSの指定とvkGetBufferDeviceAddressでアドレスを取得できるようになる
        let mut memory_allocate_flags_info = MemoryAllocateFlagsInfo::builder()
            .flags(MemoryAllocateFlags::DEVICE_ADDRESS)
            .build();

        let mut dedicated_allocate_info = MemoryDedicatedAllocateInfo::builder()
            .buffer(buffer)
            .build();

        let mut allocate_info = MemoryAllocateInfo::builder()
            .allocation_size(memory_requirements.size)
            .memory_type_index(memory_type_index);

        if usage.contains(BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            allocate_info = allocate_info.push_next(&mut memory_allocate_flags_info);
        }

        if location.is_dedicated() {
            allocate_info = allocate_info.push_next(&mut dedicated_allocate_info);
        }

        //memoryはdeviceがネイティブに扱える管理単位
        let memory = match unsafe { device.allocate_memory(&allocate_info, None) } {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(error).context(format!("vkAllocateMemory ({} bytes)", memory_requirements.size));
            }
        };

        if let Err(error) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(error).context("vkBindBufferMemory");
        }

        let device_address = if usage.contains(BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            let buffer_device_address_info = BufferDeviceAddressInfo::builder()
                .buffer(buffer)
                .build();

            unsafe { device.get_buffer_device_address(&buffer_device_address_info) }
        } else {
            0
        };

        Ok(Self {
            device,
            buffer,
            size,
            memory,
            location,
            device_address,
        })
    }

    pub fn store<T: Copy>(&mut self, data: &[T]) -> anyhow::Result<()> {
        let size = std::mem::size_of_val(data) as DeviceSize;
        //すでにBuffersが確保している領域よりも大きかったら弾く
        ensure!(self.size >= size, "store of {} bytes overflows a {} byte buffer", size, self.size);
        ensure!(self.location == MemoryLocation::CpuToGpu, "buffer {:?} is not host visible", self.buffer);

        let mapped_ptr = self.map(size)?;
        let mut mapped_slice = unsafe {
            Align::new(mapped_ptr, std::mem::align_of::<T>() as u64, size)
        };
        mapped_slice.copy_from_slice(data);
        self.unmap();

        Ok(())
    }

    fn map(&mut self, size: DeviceSize) -> anyhow::Result<*mut std::ffi::c_void> {
        unsafe {
            self.device
                .map_memory(self.memory, 0, size, MemoryMapFlags::empty())
                .context("vkMapMemory")
        }
    }

    fn unmap(&self) {
        unsafe {
            self.device.unmap_memory(self.memory)
        }
    }
}

impl DeviceBuffer for Buffers<'_> {
    fn raw(&self) -> Buffer {
        self.buffer
    }

    fn size(&self) -> DeviceSize {
        self.size
    }

    fn device_address(&self) -> DeviceAddress {
        self.device_address
    }

    fn store(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        Buffers::store(self, bytes)
    }
}

impl Drop for Buffers<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
