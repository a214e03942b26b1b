mod common;

use std::sync::Arc;

use common::{bridge_over, pattern, sample_device};
use ios_device_bridge::{BridgeError, ErrorKind, MockDevice, MockFailure, CHUNK_SIZE};

const SIZES: [usize; 4] = [0, 1, CHUNK_SIZE, CHUNK_SIZE + 1];

#[test]
fn pull_copies_exact_bytes_across_chunk_boundaries() {
    let dir = tempfile::tempdir().unwrap();

    for size in SIZES {
        let data = pattern(size);
        let remote = format!("/Downloads/file_{}.bin", size);
        let mock = Arc::new(sample_device().with_file(&remote, &data));
        let bridge = bridge_over(&mock);
        let handle = bridge.open(None).unwrap();

        let local = dir.path().join(format!("pulled_{}.bin", size));
        let bytes = bridge.pull(handle, &remote, &local).unwrap();

        assert_eq!(bytes, size as u64);
        assert_eq!(std::fs::read(&local).unwrap(), data, "size {}", size);
        assert_eq!(mock.open_files(), 0);
        bridge.close(handle).unwrap();
    }
}

#[test]
fn push_copies_exact_bytes_across_chunk_boundaries() {
    let dir = tempfile::tempdir().unwrap();

    for size in SIZES {
        let data = pattern(size);
        let local = dir.path().join(format!("local_{}.bin", size));
        std::fs::write(&local, &data).unwrap();

        let mock = Arc::new(sample_device());
        let bridge = bridge_over(&mock);
        let handle = bridge.open(None).unwrap();

        let bytes = bridge.push(handle, &local, "Downloads\\upload.bin").unwrap();
        assert_eq!(bytes, size as u64);
        assert_eq!(mock.file_contents("/Downloads/upload.bin").unwrap(), data, "size {}", size);
        assert_eq!(mock.open_files(), 0);
    }
}

#[test]
fn push_truncates_existing_remote_file() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("short.txt");
    std::fs::write(&local, b"new").unwrap();

    let mock = Arc::new(sample_device().with_file("/Downloads/notes.txt", b"a much longer old body"));
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    bridge.push(handle, &local, "/Downloads/notes.txt").unwrap();
    assert_eq!(mock.file_contents("/Downloads/notes.txt").unwrap(), b"new");
}

#[test]
fn pull_of_missing_remote_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(sample_device());
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    let err = bridge
        .pull(handle, "/DCIM/nothing.jpg", dir.path().join("nothing.jpg"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::RemoteError { .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn push_of_missing_local_fails_before_touching_device() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(sample_device());
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    let err = bridge
        .push(handle, dir.path().join("absent.bin"), "/Downloads/absent.bin")
        .unwrap_err();
    assert!(matches!(err, BridgeError::FileError(_)));
    assert!(!mock.exists("/Downloads/absent.bin"));
}

#[test]
fn pull_into_unwritable_location_closes_remote() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(sample_device());
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    let local = dir.path().join("missing-dir").join("out.bin");
    let err = bridge
        .pull(handle, "/DCIM/100APPLE/IMG_0001.HEIC", &local)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(mock.open_files(), 0);
}

#[test]
fn mid_stream_read_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(CHUNK_SIZE * 3);
    let mock = Arc::new(sample_device().with_file("/Downloads/big.bin", &data));
    mock.fail(MockFailure::ReadAfterChunks { chunks: 1, code: -4 });
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    let err = bridge
        .pull(handle, "/Downloads/big.bin", dir.path().join("big.bin"))
        .unwrap_err();
    assert!(err.to_string().contains("rc=-4"));
    assert_eq!(mock.open_files(), 0);
}

#[test]
fn mid_stream_write_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("big.bin");
    std::fs::write(&local, pattern(CHUNK_SIZE * 3)).unwrap();

    let mock = Arc::new(sample_device());
    mock.fail(MockFailure::WriteAfterChunks { chunks: 2, code: -4 });
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    let err = bridge.push(handle, &local, "/Downloads/big.bin").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(mock.open_files(), 0);
    assert_eq!(
        mock.file_contents("/Downloads/big.bin").unwrap().len(),
        CHUNK_SIZE * 2
    );
}

#[test]
fn short_write_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("small.bin");
    std::fs::write(&local, pattern(100)).unwrap();

    let mock = Arc::new(sample_device());
    mock.fail(MockFailure::ShortWrite);
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    let err = bridge.push(handle, &local, "/Downloads/small.bin").unwrap_err();
    assert!(matches!(err, BridgeError::FileError(_)));
    assert_eq!(mock.open_files(), 0);
}

#[test]
fn remote_open_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("a.bin");
    std::fs::write(&local, b"a").unwrap();

    let mock = Arc::new(sample_device());
    mock.fail(MockFailure::FileOpen(10));
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    let err = bridge.push(handle, &local, "/Downloads/a.bin").unwrap_err();
    assert!(err.to_string().contains("rc=10"));
    mock.clear_failures();
    assert_eq!(bridge.push(handle, &local, "/Downloads/a.bin").unwrap(), 1);
}

#[test]
fn closing_during_transfer_defers_release() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(CHUNK_SIZE * 4 + 7);
    let mock = Arc::new(MockDevice::new().with_device("A").with_file("/big.bin", &data));
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    let closer = bridge.clone();
    mock.set_read_hook(move || {
        // 第一次读取时关闭句柄；之后的调用返回 InvalidHandle，忽略即可
        let _ = closer.close(handle);
    });

    let local = dir.path().join("big.bin");
    let bytes = bridge.pull(handle, "/big.bin", &local).unwrap();
    assert_eq!(bytes, data.len() as u64);
    assert_eq!(std::fs::read(&local).unwrap(), data);

    assert_eq!(bridge.list_directory(handle, "/").unwrap_err().kind(), ErrorKind::InvalidHandle);
    assert_eq!(mock.stale_uses(), 0);
    assert_eq!(mock.double_frees(), 0);
    assert_eq!(mock.live_handles(), 0);
}

#[test]
fn push_then_pull_round_trips_on_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(sample_device());
    let bridge = bridge_over(&mock);
    let handle = bridge.open(None).unwrap();

    for size in SIZES {
        let data = pattern(size);
        let source = dir.path().join(format!("source_{}.bin", size));
        let copy = dir.path().join(format!("copy_{}.bin", size));
        std::fs::write(&source, &data).unwrap();

        let remote = format!("/Downloads/round_{}.bin", size);
        assert_eq!(bridge.push(handle, &source, &remote).unwrap(), size as u64);
        assert_eq!(bridge.pull(handle, &remote, &copy).unwrap(), size as u64);
        assert_eq!(std::fs::read(&copy).unwrap(), data, "size {}", size);
    }

    assert_eq!(mock.open_files(), 0);
    bridge.close(handle).unwrap();
    assert_eq!(mock.live_handles(), 0);
}
