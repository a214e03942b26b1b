use ios_device_bridge::listing::sort_for_display;
use ios_device_bridge::{prelude::*, utils};

fn main() -> BridgeResult<()> {
    // 创建配置（读取 IOSB_RUNTIME_DIR）
    let config = BridgeConfig::from_env();

    // 创建桥接实例
    let bridge = Bridge::new(Some(config));
    println!("后端版本: {}", Bridge::version());

    // 列出连接的设备
    let devices = match bridge.list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", bridge.runtime_diagnostics());
            return Err(e);
        }
    };
    println!("发现 {} 个设备:", devices.len());
    for device in &devices {
        println!("  {}", device);
    }

    let Some(first) = devices.first() else {
        return Ok(());
    };

    // 打开设备并列出 DCIM
    let handle = bridge.open(Some(&first.udid))?;
    let mut entries = bridge.list_directory(handle, "/DCIM")?;
    sort_for_display(&mut entries);
    for entry in &entries {
        let kind = if entry.is_directory { "目录" } else { "文件" };
        println!(
            "  [{}] {} {} {}",
            kind,
            entry.name,
            utils::format_size(entry.size_bytes),
            entry.modified_at().format("%Y-%m-%d %H:%M:%S")
        );
    }

    // 拉取第一个文件
    if let Some(file) = entries.iter().find(|e| !e.is_directory) {
        let local = std::env::temp_dir().join(&file.name);
        let bytes = bridge.pull(handle, &file.path, &local)?;
        println!("已拉取 {} -> {} ({})", file.path, local.display(), utils::format_size(bytes));
    }

    bridge.close(handle)?;
    Ok(())
}
