pub mod adb;
pub mod backend;
pub mod dispatcher;
pub mod text_input;
