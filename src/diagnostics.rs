//! 运行时诊断
//!
//! 找不到原生运行时是最常见的现场故障，所以加载失败时返回的不是单个错误码，
//! 而是一份逐项列出候选库与依赖库查找、加载结果的报告。

use libloading::Library;
use log::debug;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::BridgeConfig;

/// 单个文件在搜索路径上的查找结果
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: String,
    /// 找到时的完整路径
    pub found: Option<PathBuf>,
}

/// 一次加载尝试的结果
#[derive(Debug, Clone, Serialize)]
pub enum LoadOutcome {
    Loaded { name: String },
    Failed { message: String },
}

/// 运行时诊断报告
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeReport {
    pub libraries: Vec<ProbeResult>,
    pub dependencies: Vec<ProbeResult>,
    pub load: LoadOutcome,
}

impl RuntimeReport {
    /// 是否至少找到一个候选运行时
    pub fn found_any_library(&self) -> bool {
        self.libraries.iter().any(|p| p.found.is_some())
    }

    pub fn loaded(&self) -> bool {
        matches!(self.load, LoadOutcome::Loaded { .. })
    }

    /// 缺失的文件名（候选库与依赖库）
    pub fn missing(&self) -> Vec<&str> {
        self.libraries
            .iter()
            .chain(self.dependencies.iter())
            .filter(|p| p.found.is_none())
            .map(|p| p.name.as_str())
            .collect()
    }
}

impl fmt::Display for RuntimeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "libimobiledevice 运行时诊断:")?;
        for probe in self.libraries.iter().chain(self.dependencies.iter()) {
            match &probe.found {
                Some(path) => writeln!(f, "  FOUND   {} -> {}", probe.name, path.display())?,
                None => writeln!(f, "  MISSING {}", probe.name)?,
            }
        }
        match &self.load {
            LoadOutcome::Loaded { name } => writeln!(f, "  LOAD OK {}", name)?,
            LoadOutcome::Failed { message } => writeln!(f, "  LOAD FAILED: {}", message)?,
        }
        if !self.found_any_library() {
            writeln!(
                f,
                "提示: 将运行时库复制到本桥接库所在目录，或把其所在目录加入 {} / {}。",
                search_path_env(),
                crate::config::RUNTIME_DIR_ENV
            )?;
        }
        Ok(())
    }
}

/// 平台动态库搜索使用的环境变量
pub fn search_path_env() -> &'static str {
    if cfg!(windows) {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

fn system_library_dirs() -> &'static [&'static str] {
    if cfg!(windows) {
        &[]
    } else if cfg!(target_os = "macos") {
        &["/usr/local/lib", "/opt/homebrew/lib", "/usr/lib"]
    } else {
        &[
            "/usr/local/lib",
            "/usr/lib",
            "/usr/lib64",
            "/lib",
            "/usr/lib/x86_64-linux-gnu",
            "/usr/lib/aarch64-linux-gnu",
        ]
    }
}

/// 依次返回：配置目录、可执行文件所在目录、平台环境变量目录、系统目录
pub fn search_path(config: &BridgeConfig) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = config.search_dirs.clone();

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(dir);
    }

    if let Some(value) = std::env::var_os(search_path_env()) {
        dirs.extend(std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
    }

    dirs.extend(system_library_dirs().iter().map(PathBuf::from));
    dirs
}

/// 在目录列表中查找文件，返回第一个命中的完整路径
pub fn find_in_dirs(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().map(|dir| dir.join(name)).find(|p| p.is_file())
}

/// 查找一组文件名
pub fn probe_all(names: &[String], dirs: &[PathBuf]) -> Vec<ProbeResult> {
    names
        .iter()
        .map(|name| ProbeResult {
            name: name.clone(),
            found: find_in_dirs(name, dirs),
        })
        .collect()
}

/// 按候选顺序尝试加载运行时，返回第一个成功的库及其名称
pub(crate) fn open_first(
    candidates: &[String],
    preferred_dirs: &[PathBuf],
) -> Result<(Library, String), String> {
    let mut last_error = String::from("没有配置候选运行时库");

    for name in candidates {
        let explicit = find_in_dirs(name, preferred_dirs);
        let attempts = explicit
            .iter()
            .map(|p| p.as_os_str().to_os_string())
            .chain(std::iter::once(name.into()));

        for target in attempts {
            // SAFETY: 加载 libimobiledevice 只会运行其初始化代码，不依赖本进程状态
            match unsafe { Library::new(&target) } {
                Ok(library) => {
                    debug!("已加载运行时 {:?}", target);
                    return Ok((library, name.clone()));
                }
                Err(e) => {
                    debug!("加载 {:?} 失败: {}", target, e);
                    last_error = e.to_string();
                }
            }
        }
    }

    Err(last_error)
}

/// 生成诊断报告：检查候选库与依赖库是否在搜索路径上，并尝试一次加载
pub fn build_report(config: &BridgeConfig) -> RuntimeReport {
    let dirs = search_path(config);
    let libraries = probe_all(&config.library_candidates, &dirs);
    let dependencies = probe_all(&config.runtime_dependencies, &dirs);

    let load = match open_first(&config.library_candidates, &config.search_dirs) {
        // 仅用于探测，立即卸载
        Ok((library, name)) => {
            drop(library);
            LoadOutcome::Loaded { name }
        }
        Err(message) => LoadOutcome::Failed { message },
    };

    RuntimeReport {
        libraries,
        dependencies,
        load,
    }
}

/// 根据原生返回码给出处理建议
pub fn hint_for_rc(rc: i32) -> &'static str {
    match rc {
        -3 => "未找到设备。请检查 USB 线缆并解锁设备。",
        -5 => "SSL 握手失败。请在设备上重新信任此电脑。",
        -6 => "设备未配对。请通过 Apple 设备支持组件完成配对/信任。",
        -8 => "连接超时。请保持设备解锁后重试。",
        -9 => "无法连接 lockdownd。请确认已安装 Apple Mobile Device Support。",
        _ => "请检查 Apple Mobile Device Support、usbmuxd 服务以及信任配对状态。",
    }
}
