pub mod decision;
pub mod deviation;
