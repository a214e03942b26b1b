//! 符号解析：运行时加载 libimobiledevice 并绑定所需入口
//!
//! 绑定是全有或全无的：17 个符号必须全部解析成功，任何一个缺失都会卸载
//! 已打开的库并报告缺失的符号名，因此调用方永远看不到部分绑定的函数表。

use libloading::Library;
use log::{debug, info, warn};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::api::{DeviceApi, FileInfo, FileMode, NativeHandle, NativeResult, RC_NULL_OUTPUT};
use crate::config::BridgeConfig;
use crate::diagnostics;
use crate::error::{BridgeError, BridgeResult};

/// 按解析顺序列出的必需符号
pub const REQUIRED_SYMBOLS: [&str; 17] = [
    "idevice_get_device_list",
    "idevice_device_list_free",
    "idevice_new",
    "idevice_free",
    "lockdownd_client_new_with_handshake",
    "lockdownd_client_free",
    "lockdownd_start_service",
    "lockdownd_service_descriptor_free",
    "afc_client_new",
    "afc_client_free",
    "afc_read_directory",
    "afc_dictionary_free",
    "afc_get_file_info",
    "afc_file_open",
    "afc_file_close",
    "afc_file_read",
    "afc_file_write",
];

type Opaque = *mut c_void;

type IdeviceGetDeviceList = unsafe extern "C" fn(*mut *mut *mut c_char, *mut c_int) -> c_int;
type IdeviceDeviceListFree = unsafe extern "C" fn(*mut *mut c_char) -> c_int;
type IdeviceNew = unsafe extern "C" fn(*mut Opaque, *const c_char) -> c_int;
type IdeviceFree = unsafe extern "C" fn(Opaque) -> c_int;
type LockdownClientNewWithHandshake =
    unsafe extern "C" fn(Opaque, *mut Opaque, *const c_char) -> c_int;
type LockdownClientFree = unsafe extern "C" fn(Opaque) -> c_int;
type LockdownStartService = unsafe extern "C" fn(Opaque, *const c_char, *mut Opaque) -> c_int;
type LockdownServiceDescriptorFree = unsafe extern "C" fn(Opaque) -> c_int;
type AfcClientNew = unsafe extern "C" fn(Opaque, Opaque, *mut Opaque) -> c_int;
type AfcClientFree = unsafe extern "C" fn(Opaque) -> c_int;
type AfcReadDirectory = unsafe extern "C" fn(Opaque, *const c_char, *mut *mut *mut c_char) -> c_int;
type AfcDictionaryFree = unsafe extern "C" fn(*mut *mut c_char) -> c_int;
type AfcGetFileInfo = unsafe extern "C" fn(Opaque, *const c_char, *mut *mut *mut c_char) -> c_int;
type AfcFileOpen = unsafe extern "C" fn(Opaque, *const c_char, u64, *mut u64) -> c_int;
type AfcFileClose = unsafe extern "C" fn(Opaque, u64) -> c_int;
type AfcFileRead = unsafe extern "C" fn(Opaque, u64, *mut c_char, u32, *mut u32) -> c_int;
type AfcFileWrite = unsafe extern "C" fn(Opaque, u64, *const c_char, u32, *mut u32) -> c_int;

/// 已绑定的 libimobiledevice 函数表
///
/// 函数指针只在 `_library` 存活期间有效，两者放在同一结构体中一起释放。
pub struct NativeApi {
    idevice_get_device_list: IdeviceGetDeviceList,
    idevice_device_list_free: IdeviceDeviceListFree,
    idevice_new: IdeviceNew,
    idevice_free: IdeviceFree,
    lockdownd_client_new_with_handshake: LockdownClientNewWithHandshake,
    lockdownd_client_free: LockdownClientFree,
    lockdownd_start_service: LockdownStartService,
    lockdownd_service_descriptor_free: LockdownServiceDescriptorFree,
    afc_client_new: AfcClientNew,
    afc_client_free: AfcClientFree,
    afc_read_directory: AfcReadDirectory,
    afc_dictionary_free: AfcDictionaryFree,
    afc_get_file_info: AfcGetFileInfo,
    afc_file_open: AfcFileOpen,
    afc_file_close: AfcFileClose,
    afc_file_read: AfcFileRead,
    afc_file_write: AfcFileWrite,
    library_name: String,
    _library: Library,
}

fn resolve<T: Copy>(library: &Library, name: &str) -> BridgeResult<T> {
    // SAFETY: 类型别名与 libimobiledevice 头文件中的声明一致
    match unsafe { library.get::<T>(name.as_bytes()) } {
        Ok(symbol) => Ok(*symbol),
        Err(e) => {
            warn!("运行时缺少符号 {}: {}", name, e);
            Err(BridgeError::MissingSymbol(name.to_string()))
        }
    }
}

fn to_cstring(value: &str) -> NativeResult<CString> {
    // 内嵌 NUL 的字符串无法传给原生层，按参数错误处理
    CString::new(value).map_err(|_| -1)
}

fn check(rc: c_int) -> NativeResult<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(rc)
    }
}

fn non_null(rc: c_int, handle: Opaque) -> NativeResult<NativeHandle> {
    check(rc)?;
    if handle.is_null() {
        Err(RC_NULL_OUTPUT)
    } else {
        Ok(NativeHandle::from_ptr(handle))
    }
}

/// 读取以 NULL 结尾的 `char**` 列表
///
/// # Safety
///
/// `list` 必须是原生库返回的有效列表；`limit` 为 `Some` 时最多读取该数量。
unsafe fn collect_strings(list: *mut *mut c_char, limit: Option<usize>) -> Vec<String> {
    let mut out = Vec::new();
    if list.is_null() {
        return out;
    }
    let mut i = 0usize;
    loop {
        if limit.is_some_and(|n| i >= n) {
            break;
        }
        let item = *list.add(i);
        if item.is_null() {
            break;
        }
        out.push(CStr::from_ptr(item).to_string_lossy().into_owned());
        i += 1;
    }
    out
}

impl NativeApi {
    /// 解析全部必需符号；失败时 `library` 被丢弃（卸载）
    pub fn bind(library: Library, library_name: &str) -> BridgeResult<Self> {
        let api = NativeApi {
            idevice_get_device_list: resolve(&library, REQUIRED_SYMBOLS[0])?,
            idevice_device_list_free: resolve(&library, REQUIRED_SYMBOLS[1])?,
            idevice_new: resolve(&library, REQUIRED_SYMBOLS[2])?,
            idevice_free: resolve(&library, REQUIRED_SYMBOLS[3])?,
            lockdownd_client_new_with_handshake: resolve(&library, REQUIRED_SYMBOLS[4])?,
            lockdownd_client_free: resolve(&library, REQUIRED_SYMBOLS[5])?,
            lockdownd_start_service: resolve(&library, REQUIRED_SYMBOLS[6])?,
            lockdownd_service_descriptor_free: resolve(&library, REQUIRED_SYMBOLS[7])?,
            afc_client_new: resolve(&library, REQUIRED_SYMBOLS[8])?,
            afc_client_free: resolve(&library, REQUIRED_SYMBOLS[9])?,
            afc_read_directory: resolve(&library, REQUIRED_SYMBOLS[10])?,
            afc_dictionary_free: resolve(&library, REQUIRED_SYMBOLS[11])?,
            afc_get_file_info: resolve(&library, REQUIRED_SYMBOLS[12])?,
            afc_file_open: resolve(&library, REQUIRED_SYMBOLS[13])?,
            afc_file_close: resolve(&library, REQUIRED_SYMBOLS[14])?,
            afc_file_read: resolve(&library, REQUIRED_SYMBOLS[15])?,
            afc_file_write: resolve(&library, REQUIRED_SYMBOLS[16])?,
            library_name: library_name.to_string(),
            _library: library,
        };
        Ok(api)
    }

    /// 实际加载的运行时文件名
    pub fn library_name(&self) -> &str {
        &self.library_name
    }
}

impl DeviceApi for NativeApi {
    fn device_list(&self) -> NativeResult<Vec<String>> {
        let mut list: *mut *mut c_char = ptr::null_mut();
        let mut count: c_int = 0;
        // SAFETY: 输出参数指向本地变量；列表在读取后由对应的 free 函数释放
        unsafe {
            check((self.idevice_get_device_list)(&mut list, &mut count))?;
            if count < 0 {
                if !list.is_null() {
                    (self.idevice_device_list_free)(list);
                }
                return Err(RC_NULL_OUTPUT);
            }
            let udids = collect_strings(list, Some(count as usize));
            if !list.is_null() {
                (self.idevice_device_list_free)(list);
            }
            Ok(udids)
        }
    }

    fn device_new(&self, udid: &str) -> NativeResult<NativeHandle> {
        let udid = to_cstring(udid)?;
        let mut device: Opaque = ptr::null_mut();
        let rc = unsafe { (self.idevice_new)(&mut device, udid.as_ptr()) };
        non_null(rc, device)
    }

    fn device_free(&self, device: NativeHandle) {
        unsafe {
            (self.idevice_free)(device.as_ptr());
        }
    }

    fn lockdown_new_with_handshake(
        &self,
        device: NativeHandle,
        label: &str,
    ) -> NativeResult<NativeHandle> {
        let label = to_cstring(label)?;
        let mut client: Opaque = ptr::null_mut();
        let rc = unsafe {
            (self.lockdownd_client_new_with_handshake)(device.as_ptr(), &mut client, label.as_ptr())
        };
        non_null(rc, client)
    }

    fn lockdown_free(&self, client: NativeHandle) {
        unsafe {
            (self.lockdownd_client_free)(client.as_ptr());
        }
    }

    fn lockdown_start_service(
        &self,
        client: NativeHandle,
        service: &str,
    ) -> NativeResult<NativeHandle> {
        let service = to_cstring(service)?;
        let mut descriptor: Opaque = ptr::null_mut();
        let rc = unsafe {
            (self.lockdownd_start_service)(client.as_ptr(), service.as_ptr(), &mut descriptor)
        };
        non_null(rc, descriptor)
    }

    fn service_descriptor_free(&self, descriptor: NativeHandle) {
        unsafe {
            (self.lockdownd_service_descriptor_free)(descriptor.as_ptr());
        }
    }

    fn afc_client_new(
        &self,
        device: NativeHandle,
        descriptor: NativeHandle,
    ) -> NativeResult<NativeHandle> {
        let mut client: Opaque = ptr::null_mut();
        let rc =
            unsafe { (self.afc_client_new)(device.as_ptr(), descriptor.as_ptr(), &mut client) };
        non_null(rc, client)
    }

    fn afc_client_free(&self, client: NativeHandle) {
        unsafe {
            (self.afc_client_free)(client.as_ptr());
        }
    }

    fn afc_read_directory(&self, client: NativeHandle, path: &str) -> NativeResult<Vec<String>> {
        let path = to_cstring(path)?;
        let mut names: *mut *mut c_char = ptr::null_mut();
        unsafe {
            check((self.afc_read_directory)(client.as_ptr(), path.as_ptr(), &mut names))?;
            if names.is_null() {
                return Err(RC_NULL_OUTPUT);
            }
            let out = collect_strings(names, None);
            (self.afc_dictionary_free)(names);
            Ok(out)
        }
    }

    fn afc_get_file_info(&self, client: NativeHandle, path: &str) -> NativeResult<FileInfo> {
        let path = to_cstring(path)?;
        let mut dict: *mut *mut c_char = ptr::null_mut();
        unsafe {
            check((self.afc_get_file_info)(client.as_ptr(), path.as_ptr(), &mut dict))?;
            if dict.is_null() {
                return Err(RC_NULL_OUTPUT);
            }
            // 字典以 key, value, key, value, ..., NULL 的形式排列
            let flat = collect_strings(dict, None);
            (self.afc_dictionary_free)(dict);
            let mut items = flat.into_iter();
            let mut pairs = Vec::new();
            while let (Some(k), Some(v)) = (items.next(), items.next()) {
                pairs.push((k, v));
            }
            Ok(FileInfo::new(pairs))
        }
    }

    fn afc_file_open(&self, client: NativeHandle, path: &str, mode: FileMode) -> NativeResult<u64> {
        let path = to_cstring(path)?;
        let mut file: u64 = 0;
        let rc =
            unsafe { (self.afc_file_open)(client.as_ptr(), path.as_ptr(), mode as u64, &mut file) };
        check(rc).map(|_| file)
    }

    fn afc_file_close(&self, client: NativeHandle, file: u64) -> NativeResult<()> {
        check(unsafe { (self.afc_file_close)(client.as_ptr(), file) })
    }

    fn afc_file_read(&self, client: NativeHandle, file: u64, buf: &mut [u8]) -> NativeResult<usize> {
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let mut read: u32 = 0;
        let rc = unsafe {
            (self.afc_file_read)(client.as_ptr(), file, buf.as_mut_ptr() as *mut c_char, len, &mut read)
        };
        check(rc).map(|_| read as usize)
    }

    fn afc_file_write(&self, client: NativeHandle, file: u64, data: &[u8]) -> NativeResult<usize> {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let mut written: u32 = 0;
        let rc = unsafe {
            (self.afc_file_write)(client.as_ptr(), file, data.as_ptr() as *const c_char, len, &mut written)
        };
        check(rc).map(|_| written as usize)
    }
}

/// 为 `Bridge` 提供一个可用的 `DeviceApi`
pub trait ApiProvider: Send + Sync {
    fn api(&self) -> BridgeResult<Arc<dyn DeviceApi>>;
}

/// 固定的 `DeviceApi` 实现（测试替身或宿主自带实现）
pub struct StaticApi(pub Arc<dyn DeviceApi>);

impl ApiProvider for StaticApi {
    fn api(&self) -> BridgeResult<Arc<dyn DeviceApi>> {
        Ok(self.0.clone())
    }
}

/// 延迟加载原生运行时
///
/// 首次成功加载后结果被缓存到进程（或所属 `Bridge`）生命周期结束；加载失败时
/// 不缓存任何状态，下一次调用从头重试。整个加载过程持有同一把锁，避免多个线程
/// 同时首次加载。
pub struct RuntimeLoader {
    config: BridgeConfig,
    table: Mutex<Option<Arc<NativeApi>>>,
}

impl RuntimeLoader {
    pub fn new(config: BridgeConfig) -> Self {
        RuntimeLoader {
            config,
            table: Mutex::new(None),
        }
    }

    /// 确保运行时已加载并完成绑定
    pub fn ensure_loaded(&self) -> BridgeResult<Arc<NativeApi>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(api) = table.as_ref() {
            return Ok(api.clone());
        }

        let (library, name) =
            match diagnostics::open_first(&self.config.library_candidates, &self.config.search_dirs) {
                Ok(loaded) => loaded,
                Err(message) => {
                    warn!("无法加载 libimobiledevice 运行时: {}", message);
                    return Err(BridgeError::RuntimeMissing {
                        report: diagnostics::build_report(&self.config).to_string(),
                    });
                }
            };

        debug!("开始解析 {} 中的 {} 个符号", name, REQUIRED_SYMBOLS.len());
        let api = Arc::new(NativeApi::bind(library, &name)?);
        info!("libimobiledevice 运行时已就绪: {}", api.library_name());
        *table = Some(api.clone());
        Ok(api)
    }

    pub fn is_loaded(&self) -> bool {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl ApiProvider for RuntimeLoader {
    fn api(&self) -> BridgeResult<Arc<dyn DeviceApi>> {
        let api: Arc<dyn DeviceApi> = self.ensure_loaded()?;
        Ok(api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfigBuilder;
    use std::collections::HashSet;

    #[test]
    fn seventeen_distinct_symbols() {
        let unique: HashSet<_> = REQUIRED_SYMBOLS.iter().collect();
        assert_eq!(unique.len(), 17);
        assert!(!REQUIRED_SYMBOLS.contains(&"lockdownd_get_device_name"));
    }

    #[test]
    fn missing_runtime_reports_diagnostics_and_retries() {
        let config = BridgeConfigBuilder::default()
            .library_candidates(&["libiosb-not-installed.so.1"])
            .build();
        let loader = RuntimeLoader::new(config);

        for _ in 0..2 {
            match loader.ensure_loaded() {
                Err(BridgeError::RuntimeMissing { report }) => {
                    assert!(report.contains("MISSING libiosb-not-installed.so.1"));
                }
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => panic!("runtime should not load"),
            }
            assert!(!loader.is_loaded());
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn library_without_symbols_is_unloaded_and_retried() {
        let config = BridgeConfigBuilder::default()
            .library_candidates(&["libc.so.6"])
            .build();
        let loader = RuntimeLoader::new(config);

        for _ in 0..2 {
            match loader.ensure_loaded() {
                Err(BridgeError::MissingSymbol(name)) => {
                    assert_eq!(name, "idevice_get_device_list");
                }
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => panic!("libc should not bind"),
            }
            assert!(!loader.is_loaded());
        }
    }

    #[test]
    fn dictionary_pairs_are_collected() {
        let key = CString::new("st_size").unwrap();
        let value = CString::new("42").unwrap();
        let mut raw = [key.as_ptr() as *mut c_char, value.as_ptr() as *mut c_char, ptr::null_mut()];
        let flat = unsafe { collect_strings(raw.as_mut_ptr(), None) };
        assert_eq!(flat, vec!["st_size".to_string(), "42".to_string()]);

        let limited = unsafe { collect_strings(raw.as_mut_ptr(), Some(1)) };
        assert_eq!(limited, vec!["st_size".to_string()]);
    }
}
