pub mod entity;
pub mod fields;
pub mod update;
