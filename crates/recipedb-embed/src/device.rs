use anyhow::{anyhow, Result};
use candle_core::{DType, Device};

pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) { tracing::info!("🚀 Device: Metal (MPS)"); return dev; }
    }
    tracing::info!("🖥️  Device: CPU");
    Device::Cpu
}

pub fn parse_dtype(name: &str) -> Result<DType> {
    match name.to_ascii_lowercase().as_str() {
        "f32" | "float32" => Ok(DType::F32),
        "f16" | "float16" => Ok(DType::F16),
        "bf16" | "bfloat16" => Ok(DType::BF16),
        other => Err(anyhow!(recipedb_core::error::Error::InvalidConfig(format!("unsupported dtype '{other}'")))),
    }
}
