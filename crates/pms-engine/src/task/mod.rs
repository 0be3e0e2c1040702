mod types;

pub use types::{RejectingTaskExecutor, ResponseData, TaskExecutor, TaskExecutorError, TaskRequest};
