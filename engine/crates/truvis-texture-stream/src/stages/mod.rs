//! 流水线的各个阶段，每个阶段完成后通过 [`crate::service::advance_and_dispatch`] 推进到下一阶段

pub(crate) mod allocate;
pub(crate) mod decode;
pub(crate) mod mip_gen;
pub(crate) mod upload;
