pub mod action;
pub mod conversation;
pub mod engine;
pub mod history;
pub mod loop_control;
pub mod state;
