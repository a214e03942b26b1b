//! C ABI 导出层
//!
//! 所有导出函数都是同步、阻塞的，并遵循简单的返回码协议：
//!
//! - 大多数函数成功返回 1，失败返回 0；
//! - `iosb_enumerate_devices` / `iosb_list_directory` 返回条目数，负数表示失败；
//!   输出指针为空时只返回可用条目总数（容量探测），不写任何缓冲区。
//!
//! 失败原因写入当前线程的"最后错误"，必须在同一线程、下一次桥接调用之前通过
//! `iosb_get_last_error` 读取。panic 不会穿过边界。
//!
//! # 在 C# (Windows) 中调用
//!
//! ```csharp
//! [DllImport("ios_device_bridge.dll", CallingConvention = CallingConvention.Cdecl)]
//! private static extern int iosb_open_device(string udid, out int handle);
//! ```

use log::error;
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use crate::config::BridgeConfig;
use crate::device::{Bridge, DeviceInfo};
use crate::error::BridgeError;
use crate::listing::DirectoryEntry;
use crate::marshal::{copy_text, copy_to_c_chars, MAX_NAME, MAX_PATH, MAX_UDID};

// ============================================================================
// C 兼容类型
// ============================================================================

/// 设备信息
#[repr(C)]
pub struct IosbDeviceInfo {
    pub udid: [c_char; MAX_UDID],
    pub name: [c_char; MAX_NAME],
}

impl IosbDeviceInfo {
    fn from_device(device: &DeviceInfo) -> Self {
        let mut out = IosbDeviceInfo {
            udid: [0; MAX_UDID],
            name: [0; MAX_NAME],
        };
        copy_to_c_chars(&mut out.udid, &device.udid);
        copy_to_c_chars(&mut out.name, &device.name);
        out
    }
}

/// 目录项
#[repr(C)]
pub struct IosbFileEntry {
    pub path: [c_char; MAX_PATH],
    pub name: [c_char; MAX_NAME],
    pub is_directory: c_int,
    pub size_bytes: u64,
    pub modified_unix: i64,
}

impl IosbFileEntry {
    fn from_entry(entry: &DirectoryEntry) -> Self {
        let mut out = IosbFileEntry {
            path: [0; MAX_PATH],
            name: [0; MAX_NAME],
            is_directory: c_int::from(entry.is_directory),
            size_bytes: entry.size_bytes,
            modified_unix: entry.modified_unix,
        };
        copy_to_c_chars(&mut out.path, &entry.path);
        copy_to_c_chars(&mut out.name, &entry.name);
        out
    }
}

// ============================================================================
// 最后错误
// ============================================================================

thread_local! {
    static LAST_ERROR: RefCell<String> = const { RefCell::new(String::new()) };
}

fn set_last_error(message: impl ToString) {
    let mut message = message.to_string();
    if message.is_empty() {
        message = "未知错误".to_string();
    }
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

/// 当前线程最后一次失败的错误信息；从未失败时为空
pub fn last_error() -> String {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

// ============================================================================
// 内部实现
// ============================================================================

static BRIDGE: Lazy<Bridge> = Lazy::new(|| Bridge::new(Some(BridgeConfig::from_env())));

/// 捕获 panic，转换为失败返回码
fn guarded(fallback: c_int, f: impl FnOnce() -> c_int) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(rc) => rc,
        Err(_) => {
            error!("桥接调用发生 panic");
            set_last_error("内部错误: 桥接调用发生 panic");
            fallback
        }
    }
}

/// 写入调用方提供的文本缓冲区
///
/// # Safety
///
/// `buffer` 为空或指向至少 `size` 字节的可写内存。
unsafe fn write_buffer(buffer: *mut c_char, size: c_int, text: &str) -> bool {
    if buffer.is_null() || size <= 0 {
        return false;
    }
    let dest = std::slice::from_raw_parts_mut(buffer as *mut u8, size as usize);
    copy_text(dest, text)
}

/// # Safety
///
/// `ptr` 为空或指向以 NUL 结尾的字符串。
unsafe fn read_str<'a>(ptr: *const c_char) -> Option<std::borrow::Cow<'a, str>> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy())
    }
}

fn count_to_c(count: usize) -> c_int {
    c_int::try_from(count).unwrap_or(c_int::MAX)
}

pub(crate) fn enumerate_devices_with(
    bridge: &Bridge,
    out_devices: *mut IosbDeviceInfo,
    max_devices: c_int,
) -> c_int {
    if max_devices < 0 {
        set_last_error(BridgeError::InvalidArgument("max_devices 必须 >= 0".to_string()));
        return -1;
    }
    let devices = match bridge.list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            set_last_error(e);
            return -1;
        }
    };

    if out_devices.is_null() {
        return count_to_c(devices.len());
    }

    let n = devices.len().min(max_devices as usize);
    for (i, device) in devices.iter().take(n).enumerate() {
        // SAFETY: 调用方保证 out_devices 至少有 max_devices 个元素
        unsafe { out_devices.add(i).write(IosbDeviceInfo::from_device(device)) };
    }
    count_to_c(n)
}

pub(crate) fn open_device_with(bridge: &Bridge, udid: *const c_char, out_handle: *mut c_int) -> c_int {
    if out_handle.is_null() {
        set_last_error(BridgeError::InvalidArgument("out_handle 不能为空".to_string()));
        return 0;
    }
    let udid = unsafe { read_str(udid) };
    match bridge.open(udid.as_deref()) {
        Ok(handle) => {
            unsafe { out_handle.write(handle) };
            1
        }
        Err(e) => {
            set_last_error(e);
            0
        }
    }
}

pub(crate) fn close_device_with(bridge: &Bridge, handle: c_int) -> c_int {
    match bridge.close(handle) {
        Ok(()) => 1,
        Err(e) => {
            set_last_error(e);
            0
        }
    }
}

pub(crate) fn list_directory_with(
    bridge: &Bridge,
    handle: c_int,
    path: *const c_char,
    out_entries: *mut IosbFileEntry,
    max_entries: c_int,
) -> c_int {
    if max_entries < 0 {
        set_last_error(BridgeError::InvalidArgument("max_entries 必须 >= 0".to_string()));
        return -1;
    }
    let path = unsafe { read_str(path) };
    let entries = match bridge.list_directory(handle, path.as_deref().unwrap_or("")) {
        Ok(entries) => entries,
        Err(e) => {
            set_last_error(e);
            return -1;
        }
    };

    if out_entries.is_null() {
        return count_to_c(entries.len());
    }

    let n = entries.len().min(max_entries as usize);
    for (i, entry) in entries.iter().take(n).enumerate() {
        // SAFETY: 调用方保证 out_entries 至少有 max_entries 个元素
        unsafe { out_entries.add(i).write(IosbFileEntry::from_entry(entry)) };
    }
    count_to_c(n)
}

pub(crate) fn pull_file_with(
    bridge: &Bridge,
    handle: c_int,
    remote_path: *const c_char,
    local_path: *const c_char,
) -> c_int {
    let (remote, local) = match unsafe { (read_str(remote_path), read_str(local_path)) } {
        (Some(r), Some(l)) => (r, l),
        _ => {
            set_last_error(BridgeError::InvalidArgument("remote_path/local_path 不能为空".to_string()));
            return 0;
        }
    };
    match bridge.pull(handle, &remote, PathBuf::from(local.into_owned())) {
        Ok(_) => 1,
        Err(e) => {
            set_last_error(e);
            0
        }
    }
}

pub(crate) fn push_file_with(
    bridge: &Bridge,
    handle: c_int,
    local_path: *const c_char,
    remote_path: *const c_char,
) -> c_int {
    let (local, remote) = match unsafe { (read_str(local_path), read_str(remote_path)) } {
        (Some(l), Some(r)) => (l, r),
        _ => {
            set_last_error(BridgeError::InvalidArgument("local_path/remote_path 不能为空".to_string()));
            return 0;
        }
    };
    match bridge.push(handle, PathBuf::from(local.into_owned()), &remote) {
        Ok(_) => 1,
        Err(e) => {
            set_last_error(e);
            0
        }
    }
}

// ============================================================================
// 导出函数
// ============================================================================

/// 写入后端版本字符串。缓冲区不足时写入截断的值并返回 0。
#[no_mangle]
pub unsafe extern "C" fn iosb_get_version(buffer: *mut c_char, buffer_size: c_int) -> c_int {
    guarded(0, || {
        if write_buffer(buffer, buffer_size, Bridge::version()) {
            1
        } else {
            set_last_error(BridgeError::Capacity("版本信息被截断".to_string()));
            0
        }
    })
}

/// 写入当前线程的最后错误。缓冲区不足时写入截断的值并返回 0（不覆盖最后错误）。
#[no_mangle]
pub unsafe extern "C" fn iosb_get_last_error(buffer: *mut c_char, buffer_size: c_int) -> c_int {
    guarded(0, || c_int::from(write_buffer(buffer, buffer_size, &last_error())))
}

/// 写入运行时诊断报告
#[no_mangle]
pub unsafe extern "C" fn iosb_get_runtime_diagnostics(buffer: *mut c_char, buffer_size: c_int) -> c_int {
    guarded(0, || {
        let report = BRIDGE.runtime_diagnostics().to_string();
        if write_buffer(buffer, buffer_size, &report) {
            1
        } else {
            set_last_error(BridgeError::Capacity("诊断报告被截断".to_string()));
            0
        }
    })
}

/// 枚举设备。`out_devices` 为空时返回设备总数。
#[no_mangle]
pub unsafe extern "C" fn iosb_enumerate_devices(out_devices: *mut IosbDeviceInfo, max_devices: c_int) -> c_int {
    guarded(-1, || enumerate_devices_with(&BRIDGE, out_devices, max_devices))
}

/// 打开设备。`udid` 为空或空字符串时使用第一个可用设备。
#[no_mangle]
pub unsafe extern "C" fn iosb_open_device(udid: *const c_char, out_handle: *mut c_int) -> c_int {
    guarded(0, || open_device_with(&BRIDGE, udid, out_handle))
}

/// 关闭设备句柄
#[no_mangle]
pub extern "C" fn iosb_close_device(handle: c_int) -> c_int {
    guarded(0, || close_device_with(&BRIDGE, handle))
}

/// 列出远程目录。`out_entries` 为空时返回条目总数。
#[no_mangle]
pub unsafe extern "C" fn iosb_list_directory(
    handle: c_int,
    path: *const c_char,
    out_entries: *mut IosbFileEntry,
    max_entries: c_int,
) -> c_int {
    guarded(-1, || list_directory_with(&BRIDGE, handle, path, out_entries, max_entries))
}

/// 从设备拉取文件
#[no_mangle]
pub unsafe extern "C" fn iosb_pull_file(handle: c_int, remote_path: *const c_char, local_path: *const c_char) -> c_int {
    guarded(0, || pull_file_with(&BRIDGE, handle, remote_path, local_path))
}

/// 向设备推送文件
#[no_mangle]
pub unsafe extern "C" fn iosb_push_file(handle: c_int, local_path: *const c_char, remote_path: *const c_char) -> c_int {
    guarded(0, || push_file_with(&BRIDGE, handle, local_path, remote_path))
}
