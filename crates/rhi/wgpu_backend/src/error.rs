use anyhow::{Result as AnyResult, anyhow};
use log::{debug, error};
use pollster::block_on;
use rhi::RhiError;
use wgpu::{CommandBuffer, Device, ErrorFilter, Queue};

/// Submit command buffers inside a validation error scope.
///
/// # Errors
/// Returns an error if wgpu validation fails during submission.
pub fn submit_with_validation<I>(device: &Device, queue: &Queue, submissions: I) -> AnyResult<()>
where
    I: IntoIterator<Item = CommandBuffer>,
{
    device.push_error_scope(ErrorFilter::Validation);
    let index = queue.submit(submissions);
    let res = block_on(device.pop_error_scope());
    if let Some(err) = res {
        error!(target: "wgpu_backend", "validation error on submit: {err:?}");
        return Err(anyhow!("wgpu scoped error on submit: {err}"));
    }
    debug!(target: "wgpu_backend", "submission {index:?} accepted");
    Ok(())
}

/// Run a closure while a validation error scope is active.
///
/// # Errors
/// Returns an error if wgpu validation fails within the scope.
pub fn with_validation_scope<F, T>(device: &Device, label: &str, run: F) -> AnyResult<T>
where
    F: FnOnce() -> T,
{
    device.push_error_scope(ErrorFilter::Validation);
    let out = run();
    let res = block_on(device.pop_error_scope());
    if let Some(err) = res {
        error!(target: "wgpu_backend", "validation error in '{label}': {err:?}");
        return Err(anyhow!("wgpu scoped error in {label}: {err}"));
    }
    Ok(out)
}

/// Converts a wgpu-side failure into the engine's error at the backend seam.
pub fn native(err: &anyhow::Error) -> RhiError {
    RhiError::Native(format!("{err:#}"))
}
