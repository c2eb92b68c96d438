pub mod expr;
pub mod limits;
pub mod optimize;
pub mod rule;
