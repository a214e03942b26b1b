use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 额外运行时搜索目录的环境变量名（多个目录按平台 PATH 语法分隔）
pub const RUNTIME_DIR_ENV: &str = "IOSB_RUNTIME_DIR";

#[cfg(windows)]
const DEFAULT_LIBRARY_CANDIDATES: &[&str] = &["libimobiledevice-1.0.dll", "imobiledevice.dll"];
#[cfg(target_os = "macos")]
const DEFAULT_LIBRARY_CANDIDATES: &[&str] =
    &["libimobiledevice-1.0.6.dylib", "libimobiledevice-1.0.dylib"];
#[cfg(not(any(windows, target_os = "macos")))]
const DEFAULT_LIBRARY_CANDIDATES: &[&str] =
    &["libimobiledevice-1.0.so.6", "libimobiledevice-1.0.so"];

#[cfg(windows)]
const DEFAULT_RUNTIME_DEPENDENCIES: &[&str] = &[
    "libplist-2.0.dll",
    "libusbmuxd-2.0.dll",
    "libssl-3-x64.dll",
    "libcrypto-3-x64.dll",
    "zlib1.dll",
];
#[cfg(target_os = "macos")]
const DEFAULT_RUNTIME_DEPENDENCIES: &[&str] = &[
    "libplist-2.0.4.dylib",
    "libusbmuxd-2.0.7.dylib",
    "libssl.3.dylib",
    "libcrypto.3.dylib",
    "libz.1.dylib",
];
#[cfg(not(any(windows, target_os = "macos")))]
const DEFAULT_RUNTIME_DEPENDENCIES: &[&str] = &[
    "libplist-2.0.so.4",
    "libusbmuxd-2.0.so.7",
    "libssl.so.3",
    "libcrypto.so.3",
    "libz.so.1",
];

/// 桥接配置结构体
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// 按顺序尝试加载的 libimobiledevice 运行时文件名
    pub library_candidates: Vec<String>,
    /// 诊断报告中检查的运行时依赖文件名
    pub runtime_dependencies: Vec<String>,
    /// 在平台默认搜索路径之前优先尝试的目录
    #[serde(default)]
    pub search_dirs: Vec<PathBuf>,
    /// lockdownd 握手时使用的客户端标签
    pub client_label: String,
    /// 文件访问服务名
    pub service_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            library_candidates: DEFAULT_LIBRARY_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            runtime_dependencies: DEFAULT_RUNTIME_DEPENDENCIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            search_dirs: Vec::new(),
            client_label: "ios-browser".to_string(),
            service_name: "com.apple.afc".to_string(),
        }
    }
}

impl BridgeConfig {
    /// 以默认配置为基础，追加 `IOSB_RUNTIME_DIR` 中列出的目录
    pub fn from_env() -> Self {
        let mut config = BridgeConfig::default();
        if let Some(value) = std::env::var_os(RUNTIME_DIR_ENV) {
            config
                .search_dirs
                .extend(std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
        }
        config
    }
}

/// 桥接配置构建器
#[derive(Default)]
pub struct BridgeConfigBuilder {
    library_candidates: Option<Vec<String>>,
    runtime_dependencies: Option<Vec<String>>,
    search_dirs: Vec<PathBuf>,
    client_label: Option<String>,
    service_name: Option<String>,
}

impl BridgeConfigBuilder {
    /// 替换运行时候选文件名列表
    pub fn library_candidates(mut self, names: &[&str]) -> Self {
        self.library_candidates = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    /// 替换诊断时检查的依赖文件名列表
    pub fn runtime_dependencies(mut self, names: &[&str]) -> Self {
        self.runtime_dependencies = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    /// 添加优先搜索目录
    pub fn add_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    /// 设置握手客户端标签
    pub fn client_label(mut self, label: &str) -> Self {
        self.client_label = Some(label.to_string());
        self
    }

    /// 设置文件访问服务名
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// 构建桥接配置
    pub fn build(self) -> BridgeConfig {
        let default = BridgeConfig::default();

        BridgeConfig {
            library_candidates: self.library_candidates.unwrap_or(default.library_candidates),
            runtime_dependencies: self
                .runtime_dependencies
                .unwrap_or(default.runtime_dependencies),
            search_dirs: self.search_dirs,
            client_label: self.client_label.unwrap_or(default.client_label),
            service_name: self.service_name.unwrap_or(default.service_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_name_two_candidates_and_five_dependencies() {
        let config = BridgeConfig::default();
        assert_eq!(config.library_candidates.len(), 2);
        assert_eq!(config.runtime_dependencies.len(), 5);
        assert_eq!(config.service_name, "com.apple.afc");
        assert_eq!(config.client_label, "ios-browser");
        assert!(config.search_dirs.is_empty());
    }

    #[test]
    fn builder_overrides_only_what_is_set() {
        let config = BridgeConfigBuilder::default()
            .library_candidates(&["libfake.so"])
            .add_search_dir("/opt/ios/lib")
            .client_label("test-host")
            .build();

        assert_eq!(config.library_candidates, vec!["libfake.so".to_string()]);
        assert_eq!(config.search_dirs, vec![PathBuf::from("/opt/ios/lib")]);
        assert_eq!(config.client_label, "test-host");
        assert_eq!(config.service_name, "com.apple.afc");
        assert_eq!(config.runtime_dependencies.len(), 5);
    }

    #[test]
    fn deserializes_without_search_dirs() {
        let json = r#"{
            "library_candidates": ["a.dll"],
            "runtime_dependencies": [],
            "client_label": "x",
            "service_name": "com.apple.afc"
        }"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.library_candidates, vec!["a.dll".to_string()]);
        assert!(config.search_dirs.is_empty());
    }
}
