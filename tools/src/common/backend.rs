//! Backend selection, driven by the `ndarray`, `wgpu` and `cuda` features.

use burn::tensor::backend::Backend;
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        pub type SelectedBackend = burn::backend::Cuda;
        /// Name reported in logs and JSON reports.
        pub const BACKEND_NAME: &str = "cuda";
    } else if #[cfg(feature = "wgpu")] {
        pub type SelectedBackend = burn::backend::Wgpu;
        /// Name reported in logs and JSON reports.
        pub const BACKEND_NAME: &str = "wgpu";
    } else {
        pub type SelectedBackend = burn::backend::NdArray<f32>;
        /// Name reported in logs and JSON reports.
        pub const BACKEND_NAME: &str = "ndarray";
    }
}

pub type SelectedDevice = <SelectedBackend as Backend>::Device;

/// Default device of the selected backend.
pub fn create_device() -> SelectedDevice {
    SelectedDevice::default()
}
