//! 定长缓冲区写入
//!
//! 所有文本输出（版本、错误、诊断、UDID、名称、路径）都经过 `copy_text`，
//! 因此截断行为在每个输出上一致：结果总是以 NUL 结尾的有效前缀。

use std::os::raw::c_char;

/// UDID 字段容量（含结尾 NUL）
pub const MAX_UDID: usize = 64;
/// 名称字段容量（含结尾 NUL）
pub const MAX_NAME: usize = 128;
/// 路径字段容量（含结尾 NUL）
pub const MAX_PATH: usize = 512;

/// 把 `text` 复制到 `dest` 并以 NUL 结尾，最多写入 `dest.len() - 1` 个字节
///
/// 返回完整文本是否放得下。`dest` 为空时不写入并返回 `false`。
pub fn copy_text(dest: &mut [u8], text: &str) -> bool {
    let Some(room) = dest.len().checked_sub(1) else {
        return false;
    };
    let bytes = text.as_bytes();
    let n = bytes.len().min(room);
    dest[..n].copy_from_slice(&bytes[..n]);
    dest[n] = 0;
    bytes.len() <= room
}

/// 把 C 字符数组视为字节切片
pub fn as_bytes_mut(buf: &mut [c_char]) -> &mut [u8] {
    // SAFETY: c_char 与 u8 大小、对齐相同，切片长度不变
    unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut u8, buf.len()) }
}

/// 复制到 C 字符数组
pub fn copy_to_c_chars(dest: &mut [c_char], text: &str) -> bool {
    copy_text(as_bytes_mut(dest), text)
}

/// 读出以 NUL 结尾的内容（不含 NUL）
pub fn read_text(buf: &[u8]) -> &[u8] {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    &buf[..end]
}
