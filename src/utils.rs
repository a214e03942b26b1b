use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BridgeError, BridgeResult};

/// 0001-01-01T00:00:00Z
pub const MIN_UNIX_SECONDS: i64 = -62_135_596_800;
/// 9999-12-31T23:59:59Z
pub const MAX_UNIX_SECONDS: i64 = 253_402_300_799;

static UNSIGNED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\+?(\d+)").expect("valid unsigned number pattern"));
static SIGNED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([+-]?\d+)").expect("valid signed number pattern"));

/// 解析文本开头的十进制数字，缺失、非数字或溢出时返回 `fallback`
pub fn parse_u64(value: Option<&str>, fallback: u64) -> u64 {
    value
        .and_then(|s| UNSIGNED_PREFIX.captures(s))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(fallback)
}

/// 同 `parse_u64`，允许前导符号
pub fn parse_i64(value: Option<&str>, fallback: i64) -> i64 {
    value
        .and_then(|s| SIGNED_PREFIX.captures(s))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().trim_start_matches('+').parse::<i64>().ok())
        .unwrap_or(fallback)
}

/// 当前 Unix 时间（秒）
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// 把毫秒/微秒/纳秒级的时间戳缩放到秒，并限制在公元 1 年到 9999 年之间
pub fn normalize_unix_seconds(raw: i64) -> i64 {
    let mut seconds = raw;
    while !(MIN_UNIX_SECONDS..=MAX_UNIX_SECONDS).contains(&seconds) {
        seconds /= 1000;
        if seconds == 0 {
            break;
        }
    }
    seconds.clamp(MIN_UNIX_SECONDS, MAX_UNIX_SECONDS)
}

/// 格式化大小 (字节转换为 KB/MB/GB)
pub fn format_size(size_bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size_bytes >= GB {
        format!("{:.2} GB", size_bytes as f64 / GB as f64)
    } else if size_bytes >= MB {
        format!("{:.2} MB", size_bytes as f64 / MB as f64)
    } else if size_bytes >= KB {
        format!("{:.2} KB", size_bytes as f64 / KB as f64)
    } else {
        format!("{} B", size_bytes)
    }
}

/// 传给原生层的文本不能包含 NUL
pub fn ensure_no_nul(field: &str, value: &str) -> BridgeResult<()> {
    if value.contains('\0') {
        return Err(BridgeError::InvalidArgument(format!(
            "{} 不能包含 NUL 字符",
            field
        )));
    }
    Ok(())
}
