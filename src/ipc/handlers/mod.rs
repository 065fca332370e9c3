pub mod core;
pub mod grading;
pub mod marks;
pub mod reports;
pub mod roster;
pub mod schemes;
