pub mod analysis_result;
pub mod device;
pub mod operation_record;
pub mod process;
pub mod task;
