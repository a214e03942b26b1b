//! 设备管理运行时的能力接口
//!
//! `DeviceApi` 以 Rust 类型描述桥接层实际调用的原生操作。`loader::NativeApi`
//! 通过动态加载的 libimobiledevice 实现它，`mock::MockDevice` 在内存中实现它。
//! 列表、字典等由原生库分配的内存在实现内部释放，调用方只接触拥有所有权的值。

use std::os::raw::c_void;

/// 原生调用的结果，错误值为原生返回码
pub type NativeResult<T> = Result<T, i32>;

/// 原生调用返回成功但输出为空时使用的返回码
pub const RC_NULL_OUTPUT: i32 = -256;

/// 原生不透明句柄（设备、lockdownd 客户端、服务描述符、AFC 客户端）
///
/// 只是一个地址值，不负责释放；释放由 `session` 中的拥有者类型完成。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(usize);

impl NativeHandle {
    pub fn from_raw(value: usize) -> Self {
        NativeHandle(value)
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        NativeHandle(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn raw(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// AFC 文件打开模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum FileMode {
    /// 只读 (AFC_FOPEN_RDONLY)
    ReadOnly = 1,
    /// 只写，创建或截断 (AFC_FOPEN_WRONLY)
    WriteOnly = 3,
}

/// `afc_get_file_info` 返回的键值对
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pairs: Vec<(String, String)>,
}

impl FileInfo {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        FileInfo { pairs }
    }

    /// 按键查找，重复键取第一个
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FileInfo {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        FileInfo::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// 桥接层使用的设备管理运行时操作
pub trait DeviceApi: Send + Sync {
    /// 已连接设备的 UDID 列表
    fn device_list(&self) -> NativeResult<Vec<String>>;

    fn device_new(&self, udid: &str) -> NativeResult<NativeHandle>;
    fn device_free(&self, device: NativeHandle);

    fn lockdown_new_with_handshake(
        &self,
        device: NativeHandle,
        label: &str,
    ) -> NativeResult<NativeHandle>;
    fn lockdown_free(&self, client: NativeHandle);

    fn lockdown_start_service(
        &self,
        client: NativeHandle,
        service: &str,
    ) -> NativeResult<NativeHandle>;
    fn service_descriptor_free(&self, descriptor: NativeHandle);

    fn afc_client_new(
        &self,
        device: NativeHandle,
        descriptor: NativeHandle,
    ) -> NativeResult<NativeHandle>;
    fn afc_client_free(&self, client: NativeHandle);

    /// 目录下的原始名称列表（可能包含 "." 和 ".."）
    fn afc_read_directory(&self, client: NativeHandle, path: &str) -> NativeResult<Vec<String>>;
    fn afc_get_file_info(&self, client: NativeHandle, path: &str) -> NativeResult<FileInfo>;

    fn afc_file_open(&self, client: NativeHandle, path: &str, mode: FileMode) -> NativeResult<u64>;
    fn afc_file_close(&self, client: NativeHandle, file: u64) -> NativeResult<()>;
    /// 读取到 `buf`，返回读取字节数，0 表示文件结束
    fn afc_file_read(&self, client: NativeHandle, file: u64, buf: &mut [u8]) -> NativeResult<usize>;
    /// 写入 `data`，返回设备报告的写入字节数
    fn afc_file_write(&self, client: NativeHandle, file: u64, data: &[u8]) -> NativeResult<usize>;
}
