//! Devices and streams.
//!
//! Only the CPU device exists. Its lifecycle calls are no-ops and its
//! streams are always idle; tensors carry them so code written against a
//! stream keeps working unchanged.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait Device: fmt::Debug + Default + Copy + Send + Sync + 'static {
    const KIND: &'static str;

    fn init(dev: usize);
    fn shutdown(dev: usize);
    fn set_current(dev: usize);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cpu;

impl Device for Cpu {
    const KIND: &'static str = "cpu";

    fn init(dev: usize) {
        tracing::warn!(dev, "device init has no effect on cpu");
    }

    fn shutdown(dev: usize) {
        tracing::warn!(dev, "device shutdown has no effect on cpu");
    }

    fn set_current(dev: usize) {
        tracing::warn!(dev, "set_current has no effect on cpu");
    }
}

/// An execution queue on a device.
pub struct Stream<D: Device> {
    dev: usize,
    handle: AtomicBool,
    _device: PhantomData<D>,
}

impl<D: Device> Stream<D> {
    pub fn device_index(&self) -> usize {
        self.dev
    }

    /// Blocks until queued work finishes. CPU work is synchronous.
    pub fn wait(&self) {}

    pub fn is_idle(&self) -> bool {
        true
    }

    /// Attaches a BLAS handle to the stream.
    pub fn create_handle(&self) {
        if self.handle.swap(true, Ordering::AcqRel) {
            tracing::warn!(dev = self.dev, kind = D::KIND, "blas handle already exists, recreating");
        }
    }

    pub fn destroy_handle(&self) {
        if !self.handle.swap(false, Ordering::AcqRel) {
            tracing::warn!(dev = self.dev, kind = D::KIND, "blas handle released twice");
        }
    }

    pub fn has_handle(&self) -> bool {
        self.handle.load(Ordering::Acquire)
    }
}

impl<D: Device> fmt::Debug for Stream<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("kind", &D::KIND)
            .field("dev", &self.dev)
            .field("handle", &self.has_handle())
            .finish()
    }
}

pub fn new_stream<D: Device>(dev: usize) -> Arc<Stream<D>> {
    tracing::debug!(dev, kind = D::KIND, "new stream");
    Arc::new(Stream {
        dev,
        handle: AtomicBool::new(false),
        _device: PhantomData,
    })
}
