pub mod pipeline;
pub mod screenshot;
pub mod som_grid;
pub mod types;
pub mod ui_hierarchy;
