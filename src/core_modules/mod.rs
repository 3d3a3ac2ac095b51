pub mod accumulator;
pub mod color;
pub mod diagnostics;
pub mod frame;
pub mod frame_worker;
pub mod peak_resolver;
pub mod row_scanner;
pub mod worker_pool;
