//! Bus integration tests: started buses with dispatch loops running on the
//! in-memory transport.

mod builder;
mod concurrency;
mod messaging;
mod shutdown;
