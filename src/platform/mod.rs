pub mod runtime;

pub use runtime::{LocalExecutor, TaskSpawner};

#[cfg(not(target_arch = "wasm32"))]
pub use runtime::TokioSpawner;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use runtime::WasmSpawner;
