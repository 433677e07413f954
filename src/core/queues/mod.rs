//! Job queue implementations

pub mod runpod;
pub mod test_input;

pub use runpod::RunpodQueue;
pub use test_input::TestInputQueue;
