pub mod retry;
pub mod states;
