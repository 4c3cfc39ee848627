pub mod fusion;
pub mod input;
