pub mod agent;
pub mod project;
pub mod tool;
