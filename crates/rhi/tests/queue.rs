mod common;

use core::time::Duration;
use std::sync::Arc;
use std::thread;

use common::{Event, MockDevice, init_logging};
use rhi::{
    Buffer, BufferDesc, CommandEncoder, CommandQueue, Fence, FenceWait, NativeHandle, ResourceState,
    RhiConfig, RhiError, SubmitDesc,
};

fn marker_buffer(name: &str) -> rhi::CommandBuffer {
    let mut encoder = CommandEncoder::new();
    encoder.insert_debug_marker(name, [1.0, 1.0, 1.0]);
    encoder.global_barrier();
    encoder.finish().unwrap()
}

#[test]
fn buffers_are_submitted_in_caller_order() {
    init_logging();
    let device = Arc::new(MockDevice::default());
    let queue = CommandQueue::new(Arc::clone(&device), RhiConfig::new());
    let source = Buffer::new(
        BufferDesc::new(64).with_default_state(ResourceState::CopySource),
        NativeHandle(1),
    );
    let dst = Buffer::new(BufferDesc::new(64), NativeHandle(2));
    let mut encoder = CommandEncoder::new();
    encoder.copy_buffer(&dst, 0, &source, 0, 64);
    let buffers = [marker_buffer("first"), encoder.finish().unwrap()];

    let stats = queue.submit(&SubmitDesc::new(&buffers)).unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[1].buffer_barriers, 2);

    let submitted = device.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0], [Event::Call("global_barrier")]);
    assert_eq!(Event::count_calls(&submitted[1], "copy_buffer"), 1);
}

#[test]
fn unreached_wait_fails_without_submitting() {
    let device = Arc::new(MockDevice::default());
    let queue = CommandQueue::new(Arc::clone(&device), RhiConfig::new());
    let upstream = Fence::new(1);
    let done = Fence::new(0);
    let buffers = [marker_buffer("blocked")];

    let err = queue
        .submit(&SubmitDesc::new(&buffers).wait(&upstream, 2).signal(&done, 1))
        .unwrap_err();
    assert_eq!(
        err,
        RhiError::FenceNotReached {
            fence: upstream.id().0,
            required: 2,
            current: 1,
        }
    );
    assert!(device.submitted().is_empty());
    assert_eq!(done.current_value(), 0);
}

#[test]
fn reached_wait_submits_and_signals() {
    let device = Arc::new(MockDevice::default());
    let queue = CommandQueue::new(Arc::clone(&device), RhiConfig::new());
    let upstream = Fence::new(3);
    let done = Fence::new(0);
    let buffers = [marker_buffer("ready")];

    queue
        .submit(&SubmitDesc::new(&buffers).wait(&upstream, 3).signal(&done, 1))
        .unwrap();
    assert_eq!(device.submitted().len(), 1);
    assert_eq!(done.current_value(), 1);
}

#[test]
fn device_wait_blocks_until_signalled() {
    let device = Arc::new(MockDevice::default());
    let config = RhiConfig {
        fence_wait: FenceWait::Device,
        fence_timeout_ms: 10_000,
        ..RhiConfig::new()
    };
    let queue = CommandQueue::new(Arc::clone(&device), config);
    let upstream = Arc::new(Fence::new(0));
    let signaller = Arc::clone(&upstream);
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        signaller.signal(1);
    });
    let buffers = [marker_buffer("waits")];

    queue.submit(&SubmitDesc::new(&buffers).wait(&upstream, 1)).unwrap();
    producer.join().unwrap();
    assert_eq!(device.submitted().len(), 1);
}

#[test]
fn device_wait_times_out() {
    let device = Arc::new(MockDevice::default());
    let config = RhiConfig {
        fence_wait: FenceWait::Device,
        fence_timeout_ms: 5,
        ..RhiConfig::new()
    };
    let queue = CommandQueue::new(Arc::clone(&device), config);
    let upstream = Fence::new(0);
    let buffers = [marker_buffer("never")];

    let err = queue
        .submit(&SubmitDesc::new(&buffers).wait(&upstream, 1))
        .unwrap_err();
    assert!(matches!(err, RhiError::FenceNotReached { required: 1, .. }));
    assert!(device.submitted().is_empty());
}

#[test]
fn failed_recording_signals_nothing() {
    let device = Arc::new(MockDevice {
        reject_copies: true,
        ..MockDevice::default()
    });
    let queue = CommandQueue::new(Arc::clone(&device), RhiConfig::new());
    let buffer = Buffer::new(BufferDesc::new(16), NativeHandle(1));
    let mut encoder = CommandEncoder::new();
    encoder.copy_buffer(&buffer, 0, &buffer, 8, 8);
    let buffers = [marker_buffer("fine"), encoder.finish().unwrap()];
    let done = Fence::new(0);

    let err = queue
        .submit(&SubmitDesc::new(&buffers).signal(&done, 1))
        .unwrap_err();
    assert_eq!(err, RhiError::Native("copy rejected".into()));
    assert!(device.submitted().is_empty());
    assert_eq!(done.current_value(), 0);
}
