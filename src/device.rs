use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::api::DeviceApi;
use crate::config::BridgeConfig;
use crate::diagnostics::{self, RuntimeReport};
use crate::error::{BridgeError, BridgeResult};
use crate::loader::{ApiProvider, RuntimeLoader, StaticApi};
use crate::session::SessionRegistry;

/// 桥接后端版本字符串
pub const BACKEND_VERSION: &str = concat!(
    "ios-device-bridge/",
    env!("CARGO_PKG_VERSION"),
    "-libimobiledevice"
);

/// 已连接的 iOS 设备
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub udid: String,
    pub name: String,
}

impl DeviceInfo {
    /// 创建设备信息；名称与 UDID 相同
    ///
    /// 不调用 lockdownd_get_device_name，避免跨边界释放原生分配的字符串。
    pub fn new(udid: &str) -> Self {
        Self {
            udid: udid.to_string(),
            name: udid.to_string(),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.udid)
    }
}

/// 桥接主结构体
///
/// 持有配置、原生运行时提供者和会话表。克隆后的实例共享同一运行时与会话表。
#[derive(Clone)]
pub struct Bridge {
    pub config: BridgeConfig,
    pub(crate) runtime: Arc<dyn ApiProvider>,
    pub(crate) sessions: Arc<SessionRegistry>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("open_sessions", &self.sessions.len())
            .finish()
    }
}

impl Bridge {
    /// 创建使用动态加载运行时的实例
    pub fn new(config: Option<BridgeConfig>) -> Self {
        let config = config.unwrap_or_default();
        Self {
            runtime: Arc::new(RuntimeLoader::new(config.clone())),
            config,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    /// 创建使用指定 `DeviceApi` 实现的实例
    pub fn with_api(api: Arc<dyn DeviceApi>, config: Option<BridgeConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
            runtime: Arc::new(StaticApi(api)),
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    /// 后端版本
    pub fn version() -> &'static str {
        BACKEND_VERSION
    }

    /// 获取已绑定的运行时，必要时触发加载
    pub fn api(&self) -> BridgeResult<Arc<dyn DeviceApi>> {
        self.runtime.api()
    }

    /// 生成运行时诊断报告
    pub fn runtime_diagnostics(&self) -> RuntimeReport {
        diagnostics::build_report(&self.config)
    }

    /// 当前打开的会话数
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// 原始 UDID 列表，已过滤空值
    pub(crate) fn device_udids(&self, api: &dyn DeviceApi) -> BridgeResult<Vec<String>> {
        let udids = api.device_list().map_err(|code| {
            warn!("idevice_get_device_list 失败: rc={}", code);
            BridgeError::EnumerationFailed { code }
        })?;
        Ok(udids.into_iter().filter(|u| !u.is_empty()).collect())
    }

    /// 列出已连接设备
    pub fn list_devices(&self) -> BridgeResult<Vec<DeviceInfo>> {
        let api = self.api()?;
        let devices: Vec<DeviceInfo> = self
            .device_udids(api.as_ref())?
            .iter()
            .map(|udid| DeviceInfo::new(udid))
            .collect();

        debug!("设备列表: {:?}", devices);
        info!("发现 {} 个 iOS 设备", devices.len());
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{MockDevice, MockFailure};

    #[test]
    fn version_names_backend() {
        assert!(Bridge::version().starts_with("ios-device-bridge/"));
        assert!(Bridge::version().ends_with("-libimobiledevice"));
    }

    #[test]
    fn device_name_mirrors_udid() {
        let device = DeviceInfo::new("00008030-001A");
        assert_eq!(device.name, device.udid);
        assert_eq!(device.to_string(), "00008030-001A (00008030-001A)");
    }

    #[test]
    fn lists_devices_skipping_empty_ids() {
        let mock = Arc::new(MockDevice::new().with_device("A").with_device("").with_device("B"));
        let bridge = Bridge::with_api(mock, None);
        let devices = bridge.list_devices().unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.udid.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn enumeration_failure_is_device_unreachable() {
        let mock = Arc::new(MockDevice::new().with_device("A"));
        mock.fail(MockFailure::DeviceList(-9));
        let bridge = Bridge::with_api(mock, None);
        let err = bridge.list_devices().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceUnreachable);
        assert!(err.to_string().contains("rc=-9"));
    }
}
