pub const APPLICATION_NAME: &str = "linen";

pub const REQUIRED_LAYERS: [&str; 1] = ["VK_LAYER_KHRONOS_validation"];

//VkAccelerationStructureCreateInfoKHR::offsetは256の倍数でなければならない
pub const ACCELERATION_STRUCTURE_ALIGNMENT: u64 = 256;

//全てのレイタイプから見える
pub const INSTANCE_MASK_ALL: u8 = 0xFF;

pub const VALIDATION_ENV_VAR: &str = "LINEN_VALIDATION";
