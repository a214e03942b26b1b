//! 内存中的模拟设备
//!
//! `MockDevice` 实现 `DeviceApi`，不需要真实设备或原生运行时即可驱动会话表和
//! 传输引擎。它记录存活的原生句柄和打开的远程文件，用于检查泄漏与重复释放，
//! 并支持按调用注入失败。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::api::{DeviceApi, FileInfo, FileMode, NativeHandle, NativeResult};

/// AFC_E_OBJECT_NOT_FOUND
pub const RC_NOT_FOUND: i32 = 8;
/// AFC_E_OBJECT_IS_DIR
pub const RC_IS_DIRECTORY: i32 = 7;
/// 对已释放或未知句柄的调用
pub const RC_STALE_HANDLE: i32 = -1;

/// 模拟文件的修改时间（纳秒，与真实 AFC 一致）
pub const MOCK_MTIME_NS: &str = "1700000000000000000";

/// 可注入的失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    DeviceList(i32),
    DeviceNew(i32),
    Handshake(i32),
    StartService(i32),
    AfcClientNew(i32),
    ReadDirectory(i32),
    /// 指定路径的元数据读取失败
    FileInfo(String),
    FileOpen(i32),
    /// 成功读取 `chunks` 块后，下一次读取返回 `code`
    ReadAfterChunks { chunks: usize, code: i32 },
    /// 成功写入 `chunks` 块后，下一次写入返回 `code`
    WriteAfterChunks { chunks: usize, code: i32 },
    /// 每次写入都少报一个字节
    ShortWrite,
}

#[derive(Debug, Clone)]
enum MockNode {
    Directory,
    File(Vec<u8>),
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    pos: usize,
    chunks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Device,
    Lockdown,
    Service,
    Afc,
}

#[derive(Default)]
struct MockState {
    devices: Vec<String>,
    nodes: BTreeMap<String, MockNode>,
    info_overrides: HashMap<String, FileInfo>,
    next_handle: usize,
    live: HashMap<usize, HandleKind>,
    double_frees: usize,
    stale_uses: usize,
    files: HashMap<u64, OpenFile>,
    next_file: u64,
    failures: Vec<MockFailure>,
}

type ReadHook = Arc<dyn Fn() + Send + Sync>;

/// 模拟 iOS 设备
pub struct MockDevice {
    state: Mutex<MockState>,
    read_hook: Mutex<Option<ReadHook>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

fn leaf_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl MockState {
    fn allocate(&mut self, kind: HandleKind) -> NativeHandle {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        NativeHandle::from_raw(self.next_handle)
    }

    fn release(&mut self, handle: NativeHandle, kind: HandleKind) {
        match self.live.get(&handle.raw()) {
            Some(k) if *k == kind => {
                self.live.remove(&handle.raw());
            }
            _ => self.double_frees += 1,
        }
    }

    fn require(&mut self, handle: NativeHandle, kind: HandleKind) -> NativeResult<()> {
        if self.live.get(&handle.raw()) == Some(&kind) {
            Ok(())
        } else {
            self.stale_uses += 1;
            Err(RC_STALE_HANDLE)
        }
    }

    fn injected(&self, pick: impl Fn(&MockFailure) -> Option<i32>) -> NativeResult<()> {
        match self.failures.iter().find_map(pick) {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn ensure_dirs(&mut self, path: &str) {
        let mut current = Some(path.to_string());
        while let Some(p) = current {
            current = parent_of(&p).map(str::to_string);
            self.nodes.entry(p).or_insert(MockNode::Directory);
        }
    }
}

impl MockDevice {
    /// 只有根目录的空设备
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.nodes.insert("/".to_string(), MockNode::Directory);
        Self {
            state: Mutex::new(state),
            read_hook: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_device(self, udid: &str) -> Self {
        self.add_device(udid);
        self
    }

    /// 添加目录（含所有上级目录）
    pub fn with_dir(self, path: &str) -> Self {
        self.lock().ensure_dirs(path);
        self
    }

    /// 添加文件（自动创建上级目录）
    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        {
            let mut state = self.lock();
            if let Some(parent) = parent_of(path) {
                state.ensure_dirs(parent);
            }
            state
                .nodes
                .insert(path.to_string(), MockNode::File(data.to_vec()));
        }
        self
    }

    /// 用原始键值对替换某个节点的元数据
    pub fn with_file_info(self, path: &str, pairs: &[(&str, &str)]) -> Self {
        self.lock()
            .info_overrides
            .insert(path.to_string(), pairs.iter().copied().collect());
        self
    }

    pub fn add_device(&self, udid: &str) {
        self.lock().devices.push(udid.to_string());
    }

    /// 注入失败，直到 `clear_failures` 为止一直生效
    pub fn fail(&self, failure: MockFailure) {
        self.lock().failures.push(failure);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// 每次 `afc_file_read` 之前调用，调用时不持有模拟设备的内部锁
    pub fn set_read_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.read_hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// 尚未释放的原生句柄数
    pub fn live_handles(&self) -> usize {
        self.lock().live.len()
    }

    /// 重复释放或释放未知句柄的次数
    pub fn double_frees(&self) -> usize {
        self.lock().double_frees
    }

    /// 使用已释放句柄的次数
    pub fn stale_uses(&self) -> usize {
        self.lock().stale_uses
    }

    /// 尚未关闭的远程文件数
    pub fn open_files(&self) -> usize {
        self.lock().files.len()
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(path) {
            Some(MockNode::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(path)
    }
}

impl DeviceApi for MockDevice {
    fn device_list(&self) -> NativeResult<Vec<String>> {
        let state = self.lock();
        state.injected(|f| match f {
            MockFailure::DeviceList(code) => Some(*code),
            _ => None,
        })?;
        Ok(state.devices.clone())
    }

    fn device_new(&self, udid: &str) -> NativeResult<NativeHandle> {
        let mut state = self.lock();
        state.injected(|f| match f {
            MockFailure::DeviceNew(code) => Some(*code),
            _ => None,
        })?;
        if !state.devices.iter().any(|d| d == udid) {
            return Err(-3);
        }
        Ok(state.allocate(HandleKind::Device))
    }

    fn device_free(&self, device: NativeHandle) {
        self.lock().release(device, HandleKind::Device);
    }

    fn lockdown_new_with_handshake(
        &self,
        device: NativeHandle,
        _label: &str,
    ) -> NativeResult<NativeHandle> {
        let mut state = self.lock();
        state.require(device, HandleKind::Device)?;
        state.injected(|f| match f {
            MockFailure::Handshake(code) => Some(*code),
            _ => None,
        })?;
        Ok(state.allocate(HandleKind::Lockdown))
    }

    fn lockdown_free(&self, client: NativeHandle) {
        self.lock().release(client, HandleKind::Lockdown);
    }

    fn lockdown_start_service(
        &self,
        client: NativeHandle,
        _service: &str,
    ) -> NativeResult<NativeHandle> {
        let mut state = self.lock();
        state.require(client, HandleKind::Lockdown)?;
        state.injected(|f| match f {
            MockFailure::StartService(code) => Some(*code),
            _ => None,
        })?;
        Ok(state.allocate(HandleKind::Service))
    }

    fn service_descriptor_free(&self, descriptor: NativeHandle) {
        self.lock().release(descriptor, HandleKind::Service);
    }

    fn afc_client_new(
        &self,
        device: NativeHandle,
        descriptor: NativeHandle,
    ) -> NativeResult<NativeHandle> {
        let mut state = self.lock();
        state.require(device, HandleKind::Device)?;
        state.require(descriptor, HandleKind::Service)?;
        state.injected(|f| match f {
            MockFailure::AfcClientNew(code) => Some(*code),
            _ => None,
        })?;
        Ok(state.allocate(HandleKind::Afc))
    }

    fn afc_client_free(&self, client: NativeHandle) {
        self.lock().release(client, HandleKind::Afc);
    }

    fn afc_read_directory(&self, client: NativeHandle, path: &str) -> NativeResult<Vec<String>> {
        let mut state = self.lock();
        state.require(client, HandleKind::Afc)?;
        state.injected(|f| match f {
            MockFailure::ReadDirectory(code) => Some(*code),
            _ => None,
        })?;
        match state.nodes.get(path) {
            Some(MockNode::Directory) => {}
            Some(MockNode::File(_)) => return Err(RC_NOT_FOUND),
            None => return Err(RC_NOT_FOUND),
        }

        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(
            state
                .nodes
                .keys()
                .filter(|k| parent_of(k) == Some(path))
                .map(|k| leaf_of(k).to_string()),
        );
        Ok(names)
    }

    fn afc_get_file_info(&self, client: NativeHandle, path: &str) -> NativeResult<FileInfo> {
        let mut state = self.lock();
        state.require(client, HandleKind::Afc)?;
        if state
            .failures
            .iter()
            .any(|f| matches!(f, MockFailure::FileInfo(p) if p == path))
        {
            return Err(RC_NOT_FOUND);
        }
        if let Some(info) = state.info_overrides.get(path) {
            return Ok(info.clone());
        }

        let info = match state.nodes.get(path) {
            Some(MockNode::Directory) => FileInfo::from_iter([
                ("st_size", "0".to_string()),
                ("st_blocks", "0".to_string()),
                ("st_nlink", "2".to_string()),
                ("st_ifmt", "S_IFDIR".to_string()),
                ("st_mtime", MOCK_MTIME_NS.to_string()),
            ]),
            Some(MockNode::File(data)) => FileInfo::from_iter([
                ("st_size", data.len().to_string()),
                ("st_blocks", (data.len().div_ceil(4096) * 8).to_string()),
                ("st_nlink", "1".to_string()),
                ("st_ifmt", "S_IFREG".to_string()),
                ("st_mtime", MOCK_MTIME_NS.to_string()),
            ]),
            None => return Err(RC_NOT_FOUND),
        };
        Ok(info)
    }

    fn afc_file_open(&self, client: NativeHandle, path: &str, mode: FileMode) -> NativeResult<u64> {
        let mut state = self.lock();
        state.require(client, HandleKind::Afc)?;
        state.injected(|f| match f {
            MockFailure::FileOpen(code) => Some(*code),
            _ => None,
        })?;

        match mode {
            FileMode::ReadOnly => match state.nodes.get(path) {
                Some(MockNode::File(_)) => {}
                Some(MockNode::Directory) => return Err(RC_IS_DIRECTORY),
                None => return Err(RC_NOT_FOUND),
            },
            FileMode::WriteOnly => {
                let parent_is_dir = parent_of(path)
                    .map(|p| matches!(state.nodes.get(p), Some(MockNode::Directory)))
                    .unwrap_or(false);
                if !parent_is_dir {
                    return Err(RC_NOT_FOUND);
                }
                if let Some(MockNode::Directory) = state.nodes.get(path) {
                    return Err(RC_IS_DIRECTORY);
                }
                state
                    .nodes
                    .insert(path.to_string(), MockNode::File(Vec::new()));
            }
        }

        state.next_file += 1;
        let fd = state.next_file;
        state.files.insert(
            fd,
            OpenFile {
                path: path.to_string(),
                pos: 0,
                chunks: 0,
            },
        );
        Ok(fd)
    }

    fn afc_file_close(&self, client: NativeHandle, file: u64) -> NativeResult<()> {
        let mut state = self.lock();
        state.require(client, HandleKind::Afc)?;
        state.files.remove(&file).map(|_| ()).ok_or(RC_STALE_HANDLE)
    }

    fn afc_file_read(&self, client: NativeHandle, file: u64, buf: &mut [u8]) -> NativeResult<usize> {
        let hook = self
            .read_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook();
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        state.require(client, HandleKind::Afc)?;
        let open = state.files.get_mut(&file).ok_or(RC_STALE_HANDLE)?;
        if let Some(code) = state.failures.iter().find_map(|f| match f {
            MockFailure::ReadAfterChunks { chunks, code } if open.chunks >= *chunks => Some(*code),
            _ => None,
        }) {
            return Err(code);
        }

        let data = match state.nodes.get(&open.path) {
            Some(MockNode::File(data)) => data,
            _ => return Err(RC_NOT_FOUND),
        };
        let remaining = data.len().saturating_sub(open.pos);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&data[open.pos..open.pos + n]);
        open.pos += n;
        if n > 0 {
            open.chunks += 1;
        }
        Ok(n)
    }

    fn afc_file_write(&self, client: NativeHandle, file: u64, data: &[u8]) -> NativeResult<usize> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.require(client, HandleKind::Afc)?;
        let open = state.files.get_mut(&file).ok_or(RC_STALE_HANDLE)?;
        if let Some(code) = state.failures.iter().find_map(|f| match f {
            MockFailure::WriteAfterChunks { chunks, code } if open.chunks >= *chunks => Some(*code),
            _ => None,
        }) {
            return Err(code);
        }
        let short = state.failures.contains(&MockFailure::ShortWrite);
        let n = if short { data.len().saturating_sub(1) } else { data.len() };

        match state.nodes.get_mut(&open.path) {
            Some(MockNode::File(contents)) => {
                contents.truncate(open.pos);
                contents.extend_from_slice(&data[..n]);
            }
            _ => return Err(RC_NOT_FOUND),
        }
        open.pos += n;
        open.chunks += 1;
        Ok(n)
    }
}
