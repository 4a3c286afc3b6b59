use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

pub type Element = f32;

#[cfg(all(
    feature = "ndarray",
    not(any(
        feature = "wgpu",
        feature = "tch-cpu",
        feature = "tch-gpu",
        feature = "cuda"
    ))
))]
pub type MainBackend = burn::backend::NdArray<Element, i32>;
#[cfg(any(feature = "tch-cpu", feature = "tch-gpu"))]
pub type MainBackend = burn::backend::libtorch::LibTorch<Element, i32>;
#[cfg(feature = "wgpu")]
pub type MainBackend = burn::backend::wgpu::Wgpu<Element, i32>;
#[cfg(feature = "cuda")]
pub type MainBackend = burn::backend::Cuda<Element, i32>;

pub trait MainDevice: Backend {
    fn main_device() -> <Self as Backend>::Device {
        Default::default()
    }
}

#[cfg(all(
    any(
        feature = "ndarray",
        feature = "tch-cpu",
        feature = "wgpu",
        feature = "cuda"
    ),
    not(feature = "tch-gpu")
))]
impl MainDevice for MainBackend {}
#[cfg(all(feature = "tch-gpu", not(target_os = "macos")))]
impl MainDevice for MainBackend {
    fn main_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Cuda(0)
    }
}
#[cfg(all(feature = "tch-gpu", target_os = "macos"))]
impl MainDevice for MainBackend {
    fn main_device() -> <Self as Backend>::Device {
        burn::backend::libtorch::LibTorchDevice::Mps
    }
}

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;
impl MainDevice for MainAutoBackend {
    fn main_device() -> <Self as Backend>::Device {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::main_device()
    }
}

#[cfg(not(any(
    feature = "ndarray",
    feature = "tch-cpu",
    feature = "tch-gpu",
    feature = "wgpu",
    feature = "cuda"
)))]
std::compile_error!("No backend selected. Please check burn-digits/Cargo.toml for more info.");
