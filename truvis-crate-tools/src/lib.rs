//! Truvis 工具集
//!
//! 目前只提供统一的日志初始化：彩色等级、时间戳、`[file:line]`。

pub mod init_log;
