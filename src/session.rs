use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::api::{DeviceApi, NativeHandle};
use crate::config::BridgeConfig;
use crate::device::Bridge;
use crate::error::{BridgeError, BridgeResult, ConnectStage};
use crate::utils;

/// 原生资源的种类，决定释放时调用哪个函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Device,
    Lockdown,
    ServiceDescriptor,
    AfcClient,
}

/// 拥有一个原生句柄，`Drop` 时恰好释放一次
struct Owned {
    api: Arc<dyn DeviceApi>,
    kind: ResourceKind,
    handle: NativeHandle,
}

impl Owned {
    fn new(api: &Arc<dyn DeviceApi>, kind: ResourceKind, handle: NativeHandle) -> Self {
        Self {
            api: api.clone(),
            kind,
            handle,
        }
    }

    fn handle(&self) -> NativeHandle {
        self.handle
    }
}

impl Drop for Owned {
    fn drop(&mut self) {
        debug!("释放原生资源 {:?} {:#x}", self.kind, self.handle.raw());
        match self.kind {
            ResourceKind::Device => self.api.device_free(self.handle),
            ResourceKind::Lockdown => self.api.lockdown_free(self.handle),
            ResourceKind::ServiceDescriptor => self.api.service_descriptor_free(self.handle),
            ResourceKind::AfcClient => self.api.afc_client_free(self.handle),
        }
    }
}

/// 一个已打开的设备会话
///
/// 字段按声明顺序释放：先 AFC 客户端，再设备连接。
pub struct DeviceSession {
    udid: String,
    afc: Owned,
    _device: Owned,
}

impl DeviceSession {
    /// 依次建立设备连接、lockdownd 握手、启动 AFC 服务、创建 AFC 客户端
    ///
    /// 任一步失败时，已获取的资源按相反顺序释放。
    pub fn connect(api: Arc<dyn DeviceApi>, udid: &str, config: &BridgeConfig) -> BridgeResult<Self> {
        let stage_error = |stage: ConnectStage| {
            move |code: i32| {
                warn!("{}失败: udid={} rc={}", stage, udid, code);
                BridgeError::ConnectFailed { stage, code }
            }
        };

        let device = api
            .device_new(udid)
            .map(|h| Owned::new(&api, ResourceKind::Device, h))
            .map_err(stage_error(ConnectStage::Device))?;

        let lockdown = api
            .lockdown_new_with_handshake(device.handle(), &config.client_label)
            .map(|h| Owned::new(&api, ResourceKind::Lockdown, h))
            .map_err(stage_error(ConnectStage::Handshake))?;

        let service = api
            .lockdown_start_service(lockdown.handle(), &config.service_name)
            .map(|h| Owned::new(&api, ResourceKind::ServiceDescriptor, h))
            .map_err(stage_error(ConnectStage::StartService))?;

        let afc = api
            .afc_client_new(device.handle(), service.handle())
            .map(|h| Owned::new(&api, ResourceKind::AfcClient, h))
            .map_err(stage_error(ConnectStage::ServiceClient))?;

        // 服务描述符和 lockdownd 客户端只在建立阶段需要
        drop(service);
        drop(lockdown);

        Ok(Self {
            udid: udid.to_string(),
            afc,
            _device: device,
        })
    }

    pub fn udid(&self) -> &str {
        &self.udid
    }

    pub(crate) fn api(&self) -> &dyn DeviceApi {
        self.afc.api.as_ref()
    }

    pub(crate) fn afc(&self) -> NativeHandle {
        self.afc.handle()
    }
}

struct RegistryState {
    next_handle: i32,
    sessions: HashMap<i32, Arc<DeviceSession>>,
}

/// 句柄到会话的映射
///
/// 所有插入、查找、删除都持有同一把锁，但锁只在取出或放入 `Arc` 的瞬间持有，
/// 不跨越任何阻塞的原生调用。句柄从 1 开始递增，进程内不复用。
///
/// 关闭正在传输中的会话时，句柄立即失效，原生资源在最后一个进行中的操作
/// 结束（释放其 `Arc`）后才真正释放。
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_handle: 1,
                sessions: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 插入会话并分配新句柄
    pub fn insert(&self, session: DeviceSession) -> BridgeResult<i32> {
        let mut state = self.lock();
        let handle = state.next_handle;
        state.next_handle = handle
            .checked_add(1)
            .ok_or_else(|| BridgeError::InvalidArgument("设备句柄已耗尽".to_string()))?;
        state.sessions.insert(handle, Arc::new(session));
        Ok(handle)
    }

    /// 查找会话，返回共享引用后立即释放锁
    pub fn get(&self, handle: i32) -> BridgeResult<Arc<DeviceSession>> {
        self.lock()
            .sessions
            .get(&handle)
            .cloned()
            .ok_or(BridgeError::InvalidHandle(handle))
    }

    /// 删除会话；没有其它引用时在锁内释放原生资源
    pub fn remove(&self, handle: i32) -> BridgeResult<()> {
        let mut state = self.lock();
        let session = state
            .sessions
            .remove(&handle)
            .ok_or(BridgeError::InvalidHandle(handle))?;
        if Arc::strong_count(&session) > 1 {
            debug!("句柄 {} 仍有进行中的操作，原生资源将在操作结束后释放", handle);
        }
        drop(session);
        drop(state);
        Ok(())
    }

    pub fn contains(&self, handle: i32) -> bool {
        self.lock().sessions.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Bridge {
    /// 打开设备会话，`udid` 为空时使用第一个可用设备
    pub fn open(&self, udid: Option<&str>) -> BridgeResult<i32> {
        if let Some(u) = udid {
            utils::ensure_no_nul("udid", u)?;
        }
        let api = self.api()?;

        let wanted = match udid.filter(|u| !u.is_empty()) {
            Some(u) => u.to_string(),
            None => self
                .device_udids(api.as_ref())?
                .into_iter()
                .next()
                .ok_or(BridgeError::NoDevices)?,
        };

        let session = DeviceSession::connect(api, &wanted, &self.config)?;
        let handle = self.sessions.insert(session)?;
        info!("已打开设备 {}，句柄 {}", wanted, handle);
        Ok(handle)
    }

    /// 关闭设备会话
    pub fn close(&self, handle: i32) -> BridgeResult<()> {
        self.sessions.remove(handle)?;
        info!("已关闭句柄 {}", handle);
        Ok(())
    }

    /// 取出会话供一次操作使用
    pub(crate) fn session(&self, handle: i32) -> BridgeResult<Arc<DeviceSession>> {
        self.sessions.get(handle)
    }
}
