mod cpu;
mod stub;
#[cfg(feature = "backend-tract")]
mod tract;

pub use cpu::CpuBackend;
pub use stub::StubBackend;
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
