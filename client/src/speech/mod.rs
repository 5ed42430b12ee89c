pub mod recognition;
pub mod synthesis;
