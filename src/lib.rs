mod error;
mod config;
mod device;

// 原生运行时
pub mod api;
pub mod loader;
pub mod diagnostics;

// 功能模块
pub mod session;
pub mod listing;
pub mod transfer;
pub mod marshal;
pub mod ffi;
pub mod mock;
pub mod utils;

// 导出主要类型
pub use api::{DeviceApi, FileInfo, FileMode, NativeHandle};
pub use config::{BridgeConfig, BridgeConfigBuilder, RUNTIME_DIR_ENV};
pub use device::{Bridge, DeviceInfo, BACKEND_VERSION};
pub use diagnostics::RuntimeReport;
pub use error::{BridgeError, BridgeResult, ConnectStage, ErrorKind};
pub use listing::DirectoryEntry;
pub use mock::{MockDevice, MockFailure};
pub use transfer::CHUNK_SIZE;

// 便利的预导出模块
pub mod prelude {
    pub use super::{Bridge, BridgeConfig, BridgeConfigBuilder, BridgeError, BridgeResult, DeviceInfo};
    pub use super::listing::DirectoryEntry;
    pub use super::ErrorKind;
}
