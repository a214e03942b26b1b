use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::api::{DeviceApi, FileInfo, NativeHandle};
use crate::device::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::utils;

/// AFC 元数据中表示目录的 `st_ifmt` 值
pub const DIRECTORY_TAG: &str = "S_IFDIR";
/// AFC 元数据中表示普通文件的 `st_ifmt` 值
pub const REGULAR_FILE_TAG: &str = "S_IFREG";

/// 远程目录项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// 绝对路径
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub size_bytes: u64,
    /// 最后修改时间（Unix 秒）
    pub modified_unix: i64,
}

impl DirectoryEntry {
    /// 修改时间；超出可表示范围时回退到 Unix 纪元
    pub fn modified_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(utils::normalize_unix_seconds(self.modified_unix), 0)
            .unwrap_or_default()
    }

    /// 由目录路径、名称和元数据构建条目；元数据缺失时使用默认值
    pub fn from_info(dir: &str, name: &str, info: Option<&FileInfo>) -> Self {
        let now = utils::now_unix();
        let mut entry = DirectoryEntry {
            path: join_path(dir, name),
            name: name.to_string(),
            is_directory: false,
            size_bytes: 0,
            modified_unix: now,
        };

        if let Some(info) = info {
            entry.is_directory = is_directory(info);
            entry.size_bytes = utils::parse_u64(info.get("st_size"), 0);
            let mtime = utils::parse_i64(info.get("st_mtime"), now);
            entry.modified_unix = utils::normalize_unix_seconds(mtime);
        }

        entry
    }
}

/// 规范化远程路径
///
/// 反斜杠换成正斜杠，保证以 `/` 开头，去掉结尾的 `/`，空路径视为根目录。
pub fn normalize_path(path: Option<&str>) -> String {
    let raw = match path {
        Some(p) if !p.is_empty() => p,
        _ => return "/".to_string(),
    };

    let mut p = raw.replace('\\', "/");
    if !p.starts_with('/') {
        p.insert(0, '/');
    }
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

/// 拼接目录与名称
pub fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() || base == "/" {
        format!("/{}", name)
    } else if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// 根据元数据判断是否为目录
///
/// 有 `st_ifmt` 时以其为准；没有时，`st_size` 与 `st_blocks` 都为 "0" 才视为目录。
/// 这条回退规则会把空的普通文件误判为目录。
pub fn is_directory(info: &FileInfo) -> bool {
    match info.get("st_ifmt") {
        Some(DIRECTORY_TAG) => true,
        Some(REGULAR_FILE_TAG) => false,
        _ => info.get("st_size") == Some("0") && info.get("st_blocks") == Some("0"),
    }
}

/// 目录在前，再按名称排序
pub fn sort_for_display(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// 列出已规范化路径下的目录项
///
/// 读取目录本身失败时返回错误；单个条目的元数据读取失败只会使该条目使用默认值。
pub fn list_entries(
    api: &dyn DeviceApi,
    client: NativeHandle,
    path: &str,
) -> BridgeResult<Vec<DirectoryEntry>> {
    let names = api.afc_read_directory(client, path).map_err(|code| {
        warn!("读取远程目录 {} 失败: rc={}", path, code);
        BridgeError::RemoteError {
            operation: "列出目录",
            path: path.to_string(),
            code,
        }
    })?;

    let mut entries = Vec::with_capacity(names.len());
    for name in names.iter().filter(|n| *n != "." && *n != "..") {
        let full = join_path(path, name);
        let info = match api.afc_get_file_info(client, &full) {
            Ok(info) => Some(info),
            Err(code) => {
                debug!("获取 {} 的元数据失败: rc={}，使用默认值", full, code);
                None
            }
        };
        let entry = DirectoryEntry::from_info(path, name, info.as_ref());
        trace!("{:?}", entry);
        entries.push(entry);
    }

    Ok(entries)
}

impl Bridge {
    /// 列出远程目录内容
    pub fn list_directory(&self, handle: i32, path: &str) -> BridgeResult<Vec<DirectoryEntry>> {
        utils::ensure_no_nul("path", path)?;
        let session = self.session(handle)?;
        let remote = normalize_path(Some(path));
        let entries = list_entries(session.api(), session.afc(), &remote)?;
        info!("列出 {} 下的 {} 个条目 (句柄 {})", remote, entries.len(), handle);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(pairs: &[(&str, &str)]) -> FileInfo {
        pairs.iter().copied().collect()
    }

    #[test]
    fn normalizes_separators_and_slashes() {
        assert_eq!(normalize_path(None), "/");
        assert_eq!(normalize_path(Some("")), "/");
        assert_eq!(normalize_path(Some("/")), "/");
        assert_eq!(normalize_path(Some("///")), "/");
        assert_eq!(normalize_path(Some("DCIM")), "/DCIM");
        assert_eq!(normalize_path(Some("\\DCIM\\100APPLE\\")), "/DCIM/100APPLE");
        assert_eq!(normalize_path(Some("/Downloads//")), "/Downloads");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "", "/", "a", "a/", "\\", "\\\\x\\y\\", "/a//b/", " ", "//", "x\\", "/tmp/../a",
        ];
        for sample in samples {
            let once = normalize_path(Some(sample));
            assert_eq!(normalize_path(Some(&once)), once, "sample {:?}", sample);
            assert!(once.starts_with('/'));
            assert!(once == "/" || !once.ends_with('/'));
        }
    }

    #[test]
    fn joins_under_root_and_subdirs() {
        assert_eq!(join_path("/", "DCIM"), "/DCIM");
        assert_eq!(join_path("", "DCIM"), "/DCIM");
        assert_eq!(join_path("/DCIM", "IMG.JPG"), "/DCIM/IMG.JPG");
        assert_eq!(join_path("/DCIM/", "IMG.JPG"), "/DCIM/IMG.JPG");
    }

    #[test]
    fn format_tag_decides_when_present() {
        assert!(is_directory(&info(&[("st_ifmt", "S_IFDIR"), ("st_size", "96")])));
        assert!(!is_directory(&info(&[
            ("st_ifmt", "S_IFREG"),
            ("st_size", "0"),
            ("st_blocks", "0"),
        ])));
    }

    #[test]
    fn untagged_zero_size_and_blocks_is_directory() {
        assert!(is_directory(&info(&[("st_size", "0"), ("st_blocks", "0")])));
        assert!(!is_directory(&info(&[("st_size", "123"), ("st_blocks", "8")])));
        assert!(!is_directory(&info(&[("st_size", "123")])));
        assert!(!is_directory(&info(&[("st_size", "0")])));
        // 未知类型标记同样走回退规则
        assert!(is_directory(&info(&[
            ("st_ifmt", "S_IFLNK"),
            ("st_size", "0"),
            ("st_blocks", "0"),
        ])));
    }

    #[test]
    fn untagged_empty_regular_file_is_misclassified_as_directory() {
        // 已知行为：没有 st_ifmt 的空文件无法与目录区分
        let entry = DirectoryEntry::from_info(
            "/",
            "empty.txt",
            Some(&info(&[("st_size", "0"), ("st_blocks", "0")])),
        );
        assert!(entry.is_directory);
    }

    #[test]
    fn missing_metadata_uses_defaults() {
        let before = utils::now_unix();
        let entry = DirectoryEntry::from_info("/DCIM", "IMG_0001.HEIC", None);
        assert_eq!(entry.path, "/DCIM/IMG_0001.HEIC");
        assert!(!entry.is_directory);
        assert_eq!(entry.size_bytes, 0);
        assert!(entry.modified_unix >= before);
    }

    #[test]
    fn unparsable_fields_fall_back() {
        let before = utils::now_unix();
        let entry = DirectoryEntry::from_info(
            "/",
            "a",
            Some(&info(&[("st_ifmt", "S_IFREG"), ("st_size", "n/a"), ("st_mtime", "")])),
        );
        assert_eq!(entry.size_bytes, 0);
        assert!(entry.modified_unix >= before);
    }

    #[test]
    fn nanosecond_mtime_becomes_seconds() {
        let entry = DirectoryEntry::from_info(
            "/",
            "a",
            Some(&info(&[("st_ifmt", "S_IFREG"), ("st_mtime", "1700000000123456789")])),
        );
        assert_eq!(entry.modified_unix, 1_700_000_000);
        assert_eq!(entry.modified_at().timestamp(), 1_700_000_000);
    }

    #[test]
    fn display_order_puts_directories_first() {
        let mut entries = vec![
            DirectoryEntry::from_info("/", "b.txt", Some(&info(&[("st_ifmt", "S_IFREG")]))),
            DirectoryEntry::from_info("/", "Zed", Some(&info(&[("st_ifmt", "S_IFDIR")]))),
            DirectoryEntry::from_info("/", "a.txt", Some(&info(&[("st_ifmt", "S_IFREG")]))),
            DirectoryEntry::from_info("/", "DCIM", Some(&info(&[("st_ifmt", "S_IFDIR")]))),
        ];
        sort_for_display(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["DCIM", "Zed", "a.txt", "b.txt"]);
    }
}
