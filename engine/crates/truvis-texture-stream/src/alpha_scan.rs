//! 扫描 base level 的 alpha 通道
//!
//! 全部为 255 (不透明) 或全部为 0 的纹理认为不使用 alpha，其余都认为使用 alpha。
//! 数组纹理 / cubemap 的所有 layer 合在一起判断。
//! 8-bit 格式在 x86_64 上有 SSE2 路径，运行时检测，否则走标量路径。

use ash::vk;
use truvis_gfx::resources::image::VulkanFormatUtils;

/// 对 `pixels` (行紧密排列的 `format` 像素) 做 alpha 扫描
///
/// 不含 alpha 通道的格式返回 false
pub fn uses_alpha(format: vk::Format, pixels: &[u8]) -> bool {
    uses_alpha_layers(format, [pixels])
}

/// 对多个 layer 一起做 alpha 扫描，只要所有 layer 合起来不是同一个 0 / 255 就返回 true
pub fn uses_alpha_layers<'a>(format: vk::Format, layers: impl IntoIterator<Item = &'a [u8]>) -> bool {
    let _span = tracy_client::span!("alpha_scan");

    if VulkanFormatUtils::is_rgba8(format) {
        let (all, any) = layers
            .into_iter()
            .map(alpha_and_or_u8)
            .fold((0xFF, 0x00), |(all, any), (layer_all, layer_any)| (all & layer_all, any | layer_any));
        return !(all == 0xFF || any == 0);
    }
    if VulkanFormatUtils::is_rgba32f(format) {
        let mut state = AlphaF32::default();
        return layers.into_iter().any(|pixels| state.scan(pixels));
    }
    false
}

/// 返回所有 alpha 的按位与、按位或
///
/// 与 == 0xFF 说明全部不透明；或 == 0 说明全部为 0
fn alpha_and_or_u8(pixels: &[u8]) -> (u8, u8) {
    #[cfg(target_arch = "x86_64")]
    {
        if std::is_x86_feature_detected!("sse2") {
            // SAFETY: 已经在运行时确认 CPU 支持 SSE2
            return unsafe { sse2::alpha_and_or(pixels) };
        }
    }
    alpha_and_or_scalar(pixels)
}

fn alpha_and_or_scalar(pixels: &[u8]) -> (u8, u8) {
    pixels
        .chunks_exact(4)
        .fold((0xFF, 0x00), |(all, any), texel| (all & texel[3], any | texel[3]))
}

/// 跨 layer 累积的 float alpha 状态
struct AlphaF32 {
    all_opaque: bool,
    all_zero: bool,
}
impl Default for AlphaF32 {
    fn default() -> Self {
        Self {
            all_opaque: true,
            all_zero: true,
        }
    }
}
impl AlphaF32 {
    /// 一旦确定使用了 alpha 就返回 true
    fn scan(&mut self, pixels: &[u8]) -> bool {
        for texel in pixels.chunks_exact(16) {
            let alpha: f32 = bytemuck::pod_read_unaligned(&texel[12..16]);
            self.all_opaque &= alpha == 1.0;
            self.all_zero &= alpha == 0.0;
            if !self.all_opaque && !self.all_zero {
                return true;
            }
        }
        false
    }
}

#[cfg(target_arch = "x86_64")]
mod sse2 {
    use std::arch::x86_64::*;

    /// 每次处理 4 个 texel (16 字节)，剩余部分走标量路径
    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn alpha_and_or(pixels: &[u8]) -> (u8, u8) {
        let chunks = pixels.chunks_exact(16);
        let tail = chunks.remainder();

        // SAFETY: 每个 chunk 都正好 16 字节，使用 unaligned load
        let (and_bits, or_bits) = unsafe {
            let alpha_mask = _mm_set1_epi32(0xFF00_0000_u32 as i32);
            let mut and_acc = _mm_set1_epi32(-1);
            let mut or_acc = _mm_setzero_si128();
            for chunk in chunks {
                let texels = _mm_loadu_si128(chunk.as_ptr() as *const __m128i);
                let alpha = _mm_and_si128(texels, alpha_mask);
                and_acc = _mm_and_si128(and_acc, alpha);
                or_acc = _mm_or_si128(or_acc, alpha);
            }

            let mut and_lanes = [0u32; 4];
            let mut or_lanes = [0u32; 4];
            _mm_storeu_si128(and_lanes.as_mut_ptr() as *mut __m128i, and_acc);
            _mm_storeu_si128(or_lanes.as_mut_ptr() as *mut __m128i, or_acc);
            (
                and_lanes.iter().fold(u32::MAX, |acc, lane| acc & lane),
                or_lanes.iter().fold(0, |acc, lane| acc | lane),
            )
        };

        let (tail_and, tail_or) = super::alpha_and_or_scalar(tail);
        // 小端序下 alpha 位于每个 u32 的最高字节
        ((and_bits >> 24) as u8 & tail_and, (or_bits >> 24) as u8 | tail_or)
    }
}
