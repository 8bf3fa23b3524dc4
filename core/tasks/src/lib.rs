//! Process/task execution (`spec.md` §4.4), grounded in
//! `troup/tasks.py`'s `TaskRun`/`TasksRunner` and `troup/process.py`'s
//! `LocalProcess`/`SSHRemoteProcess`.

mod process_task;
mod ring_buffer;
mod runner;

pub use process_task::{ProcessTask, RunnableTask};
pub use ring_buffer::RingBuffer;
pub use runner::{TaskError, TaskRun, TaskRunner};
