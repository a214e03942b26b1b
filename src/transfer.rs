use log::{debug, info, warn};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use crate::api::{DeviceApi, FileMode, NativeHandle};
use crate::device::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::listing::normalize_path;
use crate::utils::{self, format_size};

/// 单次读写的分块大小，拉取和推送共用
pub const CHUNK_SIZE: usize = 64 * 1024;

/// 打开的远程文件，`Drop` 时关闭
struct RemoteFile<'a> {
    api: &'a dyn DeviceApi,
    client: NativeHandle,
    handle: u64,
    path: &'a str,
}

impl<'a> RemoteFile<'a> {
    fn open(
        api: &'a dyn DeviceApi,
        client: NativeHandle,
        path: &'a str,
        mode: FileMode,
    ) -> BridgeResult<Self> {
        let handle = api.afc_file_open(client, path, mode).map_err(|code| {
            let operation = match mode {
                FileMode::ReadOnly => "打开远程文件(读)",
                FileMode::WriteOnly => "打开远程文件(写)",
            };
            BridgeError::RemoteError {
                operation,
                path: path.to_string(),
                code,
            }
        })?;
        Ok(Self {
            api,
            client,
            handle,
            path,
        })
    }

    fn read(&self, buf: &mut [u8]) -> BridgeResult<usize> {
        self.api
            .afc_file_read(self.client, self.handle, buf)
            .map_err(|code| BridgeError::RemoteError {
                operation: "读取远程文件",
                path: self.path.to_string(),
                code,
            })
    }

    /// 写入一块数据，设备报告的写入量必须与请求一致
    fn write_chunk(&self, data: &[u8]) -> BridgeResult<()> {
        let written = self
            .api
            .afc_file_write(self.client, self.handle, data)
            .map_err(|code| BridgeError::RemoteError {
                operation: "写入远程文件",
                path: self.path.to_string(),
                code,
            })?;
        if written != data.len() {
            warn!("远程短写: 请求 {} 字节，写入 {} 字节", data.len(), written);
            return Err(BridgeError::FileError(format!(
                "写入远程文件 {} 不完整: {}/{} 字节",
                self.path,
                written,
                data.len()
            )));
        }
        Ok(())
    }
}

impl Drop for RemoteFile<'_> {
    fn drop(&mut self) {
        if let Err(code) = self.api.afc_file_close(self.client, self.handle) {
            warn!("关闭远程文件 {} 失败: rc={}", self.path, code);
        }
    }
}

/// 读满一个分块，遇到文件结束时返回实际读到的字节数
fn fill_chunk(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// 把远程文件拉取到本地，返回传输的字节数
///
/// 不做重试；失败时本地可能留下部分内容，但一定返回错误。
pub fn pull_file(
    api: &dyn DeviceApi,
    client: NativeHandle,
    remote_path: &str,
    local_path: &Path,
) -> BridgeResult<u64> {
    let remote = RemoteFile::open(api, client, remote_path, FileMode::ReadOnly)?;

    let mut local = File::create(local_path).map_err(|e| {
        BridgeError::FileError(format!("无法创建本地文件 {}: {}", local_path.display(), e))
    })?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let read = remote.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        local.write_all(&buffer[..read]).map_err(|e| {
            BridgeError::FileError(format!("写入本地文件 {} 失败: {}", local_path.display(), e))
        })?;
        total += read as u64;
    }

    local.flush().map_err(|e| {
        BridgeError::FileError(format!("写入本地文件 {} 失败: {}", local_path.display(), e))
    })?;
    Ok(total)
}

/// 把本地文件推送到设备（创建或截断远程文件），返回传输的字节数
pub fn push_file(
    api: &dyn DeviceApi,
    client: NativeHandle,
    local_path: &Path,
    remote_path: &str,
) -> BridgeResult<u64> {
    let mut local = File::open(local_path).map_err(|e| {
        BridgeError::FileError(format!("无法打开本地文件 {}: {}", local_path.display(), e))
    })?;

    let remote = RemoteFile::open(api, client, remote_path, FileMode::WriteOnly)?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let got = fill_chunk(&mut local, &mut buffer).map_err(|e| {
            BridgeError::FileError(format!("读取本地文件 {} 失败: {}", local_path.display(), e))
        })?;
        if got == 0 {
            break;
        }
        remote.write_chunk(&buffer[..got])?;
        total += got as u64;
    }

    Ok(total)
}

impl Bridge {
    /// 从设备拉取文件
    pub fn pull(&self, handle: i32, remote_path: &str, local_path: impl AsRef<Path>) -> BridgeResult<u64> {
        let local_path = local_path.as_ref();
        utils::ensure_no_nul("remote_path", remote_path)?;
        let session = self.session(handle)?;
        let remote = normalize_path(Some(remote_path));

        info!("开始从设备拉取文件: {} -> {}", remote, local_path.display());
        let bytes = pull_file(session.api(), session.afc(), &remote, local_path)
            .inspect_err(|e| warn!("拉取 {} 失败: {}", remote, e))?;

        debug!("成功拉取文件 {} ({})", remote, format_size(bytes));
        Ok(bytes)
    }

    /// 向设备推送文件
    pub fn push(&self, handle: i32, local_path: impl AsRef<Path>, remote_path: &str) -> BridgeResult<u64> {
        let local_path = local_path.as_ref();
        utils::ensure_no_nul("remote_path", remote_path)?;
        let session = self.session(handle)?;
        let remote = normalize_path(Some(remote_path));

        info!("开始向设备推送文件: {} -> {}", local_path.display(), remote);
        let bytes = push_file(session.api(), session.afc(), local_path, &remote)
            .inspect_err(|e| warn!("推送 {} 失败: {}", remote, e))?;

        debug!("成功推送文件 {} ({})", remote, format_size(bytes));
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Trickle<R>(R);

    impl<R: Read> Read for Trickle<R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(7);
            self.0.read(&mut buf[..n])
        }
    }

    #[test]
    fn fill_chunk_collects_short_reads() {
        let data = vec![9u8; 100];
        let mut reader = Trickle(Cursor::new(data));
        let mut buf = [0u8; 64];
        assert_eq!(fill_chunk(&mut reader, &mut buf).unwrap(), 64);
        assert_eq!(fill_chunk(&mut reader, &mut buf).unwrap(), 36);
        assert_eq!(fill_chunk(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn chunk_is_64_kib() {
        assert_eq!(CHUNK_SIZE, 65536);
    }
}
