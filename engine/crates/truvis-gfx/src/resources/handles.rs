/// device 上一个纹理资源的句柄 (对应 `vk::Image`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GfxResourceHandle(u64);
impl GfxResourceHandle {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// 纹理背后的内存分配句柄 (对应 `vk_mem::Allocation`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GfxAllocationHandle(u64);
impl GfxAllocationHandle {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// device 创建出的纹理：resource + allocation
///
/// # Destroy
/// 不实现 Clone，只能通过 `GfxDevice::destroy_texture` 消耗掉，保证只释放一次
#[derive(Debug, PartialEq, Eq)]
pub struct GfxTexture {
    resource: GfxResourceHandle,
    allocation: GfxAllocationHandle,
}
// new & init
impl GfxTexture {
    #[inline]
    pub fn new(resource: GfxResourceHandle, allocation: GfxAllocationHandle) -> Self {
        Self { resource, allocation }
    }
}
// getters
impl GfxTexture {
    #[inline]
    pub fn resource(&self) -> GfxResourceHandle {
        self.resource
    }

    #[inline]
    pub fn allocation(&self) -> GfxAllocationHandle {
        self.allocation
    }
}
