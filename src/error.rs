use std::fmt;
use thiserror::Error;

use crate::diagnostics::hint_for_rc;

/// 错误分类，对应调用方需要采取的不同处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 原生运行时或其导出符号缺失
    RuntimeMissing,
    /// 设备不可达：无设备、连接/握手/服务启动失败
    DeviceUnreachable,
    /// 句柄不存在或已关闭
    InvalidHandle,
    /// 本地或远程文件读写失败
    Io,
    /// 输出缓冲区容量不足（值已截断写入）
    Capacity,
    /// 调用参数不合法
    InvalidArgument,
}

/// 建立设备会话的各个阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Device,
    Handshake,
    StartService,
    ServiceClient,
}

impl ConnectStage {
    /// 针对该阶段的处理建议
    pub fn remedy(&self) -> &'static str {
        match self {
            ConnectStage::Device => "请确认设备已连接并信任此电脑。",
            ConnectStage::Handshake => "请解锁设备并在设备上信任此电脑。",
            ConnectStage::StartService => "设备拒绝启动 AFC 服务，请解锁设备后重试。",
            ConnectStage::ServiceClient => "AFC 客户端初始化失败，请重新插拔设备后重试。",
        }
    }
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStage::Device => write!(f, "连接 iOS 设备"),
            ConnectStage::Handshake => write!(f, "lockdownd 握手"),
            ConnectStage::StartService => write!(f, "启动 AFC 服务"),
            ConnectStage::ServiceClient => write!(f, "初始化 AFC 客户端"),
        }
    }
}

/// 桥接操作相关的错误类型
#[derive(Debug, Error)]
pub enum BridgeError {
    /// 未能加载 libimobiledevice 运行时，附带完整诊断报告
    #[error("无法加载 libimobiledevice 运行时\n{report}")]
    RuntimeMissing { report: String },

    /// 运行时已加载但缺少必需的导出符号
    #[error("libimobiledevice 运行时缺少符号: {0}")]
    MissingSymbol(String),

    /// 没有可用设备
    #[error("未找到 iOS 设备。请检查 USB 连接并解锁设备。")]
    NoDevices,

    /// 枚举设备失败
    #[error("枚举 iOS 设备失败 (idevice_get_device_list rc={code})。{}", rc_hint(.code))]
    EnumerationFailed { code: i32 },

    /// 建立会话的某个阶段失败
    #[error("{stage}失败 (rc={code})。{} {}", stage_remedy(.stage), rc_hint(.code))]
    ConnectFailed { stage: ConnectStage, code: i32 },

    /// 句柄不存在或已关闭
    #[error("无效或已关闭的设备句柄: {0}")]
    InvalidHandle(i32),

    /// 本地文件操作错误
    #[error("文件操作错误: {0}")]
    FileError(String),

    /// 远程 (AFC) 文件操作错误
    #[error("远程文件操作失败: {operation} {path} (rc={code})")]
    RemoteError {
        operation: &'static str,
        path: String,
        code: i32,
    },

    /// 输出缓冲区过小
    #[error("缓冲区过小: {0}")]
    Capacity(String),

    /// 参数错误
    #[error("参数错误: {0}")]
    InvalidArgument(String),
}

impl BridgeError {
    /// 返回错误所属分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::RuntimeMissing { .. } | BridgeError::MissingSymbol(_) => {
                ErrorKind::RuntimeMissing
            }
            BridgeError::NoDevices
            | BridgeError::EnumerationFailed { .. }
            | BridgeError::ConnectFailed { .. } => ErrorKind::DeviceUnreachable,
            BridgeError::InvalidHandle(_) => ErrorKind::InvalidHandle,
            BridgeError::FileError(_) | BridgeError::RemoteError { .. } => ErrorKind::Io,
            BridgeError::Capacity(_) => ErrorKind::Capacity,
            BridgeError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

fn rc_hint(code: &i32) -> &'static str {
    hint_for_rc(*code)
}

fn stage_remedy(stage: &ConnectStage) -> &'static str {
    stage.remedy()
}

impl From<std::io::Error> for BridgeError {
    fn from(error: std::io::Error) -> Self {
        BridgeError::FileError(error.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            BridgeError::MissingSymbol("afc_file_read".into()).kind(),
            ErrorKind::RuntimeMissing
        );
        assert_eq!(BridgeError::NoDevices.kind(), ErrorKind::DeviceUnreachable);
        assert_eq!(BridgeError::InvalidHandle(7).kind(), ErrorKind::InvalidHandle);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(BridgeError::from(io).kind(), ErrorKind::Io);
    }

    #[test]
    fn connect_failure_carries_stage_and_hint() {
        let err = BridgeError::ConnectFailed {
            stage: ConnectStage::Handshake,
            code: -5,
        };
        let text = err.to_string();
        assert!(text.contains("lockdownd 握手"));
        assert!(text.contains("rc=-5"));
        assert!(text.contains(hint_for_rc(-5)));
    }

    #[test]
    fn missing_symbol_names_the_symbol() {
        let err = BridgeError::MissingSymbol("afc_file_write".into());
        assert!(err.to_string().ends_with("afc_file_write"));
    }
}
