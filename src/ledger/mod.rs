pub mod decoder;
pub mod parser;
pub mod updater;
