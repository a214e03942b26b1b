#![allow(dead_code)]

use std::sync::Arc;

use ios_device_bridge::{Bridge, BridgeConfigBuilder, MockDevice};

pub const UDID_A: &str = "00008030-001A2C3E0A88802E";
pub const UDID_B: &str = "00008110-000C48E11E2A801E";

/// 带两个设备和一个相册目录的模拟设备
pub fn sample_device() -> MockDevice {
    MockDevice::new()
        .with_device(UDID_A)
        .with_device(UDID_B)
        .with_file("/DCIM/100APPLE/IMG_0001.HEIC", &[0xAB; 2048])
        .with_file("/DCIM/100APPLE/IMG_0002.MOV", &[0xCD; 10])
        .with_dir("/DCIM/100APPLE/Edited")
        .with_dir("/Downloads")
}

pub fn bridge_over(mock: &Arc<MockDevice>) -> Bridge {
    Bridge::with_api(mock.clone(), None)
}

/// 找不到任何运行时库的桥接实例
pub fn bridge_without_runtime() -> Bridge {
    let config = BridgeConfigBuilder::default()
        .library_candidates(&["libiosb-definitely-missing.so"])
        .runtime_dependencies(&["libiosb-missing-dep.so"])
        .build();
    Bridge::new(Some(config))
}

/// 可预测的测试数据
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
