use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 流式加载服务的配置
///
/// 所有字段都有默认值，TOML 中只需要写出要覆盖的项：
/// ```toml
/// disk_workers = 4
/// mip_workers = 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureStreamingConfig {
    /// 磁盘 IO + 解码线程数，0 表示取硬件线程数的一半
    pub disk_workers: usize,

    /// mip 生成线程数，CPU 密集，保持较小避免抢占 cache
    pub mip_workers: usize,

    /// 每个纹理在 upload heap 中的起始对齐
    pub staging_alignment: u64,

    /// 线程名前缀，在调试器和 profiler 中区分各个 pool
    pub thread_name_prefix: String,
}
impl Default for TextureStreamingConfig {
    fn default() -> Self {
        Self {
            disk_workers: 0,
            mip_workers: 2,
            staging_alignment: 512,
            thread_name_prefix: "Texture".to_string(),
        }
    }
}
// load
impl TextureStreamingConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read streaming config: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content).with_context(|| format!("failed to parse streaming config: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 代码中直接构造的配置也要经过同样的检查，`initialize` 会调用
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.mip_workers > 0, "mip_workers must be at least 1");
        anyhow::ensure!(
            self.staging_alignment.is_power_of_two(),
            "staging_alignment must be a power of two, got {}",
            self.staging_alignment
        );
        Ok(())
    }
}
// getters
impl TextureStreamingConfig {
    /// IO 密集，允许超额订阅，取硬件线程数的一半
    pub fn disk_worker_count(&self) -> usize {
        if self.disk_workers > 0 {
            return self.disk_workers;
        }
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        (cores / 2).max(1)
    }
}
