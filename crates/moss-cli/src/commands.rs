pub mod history;
pub mod lock;
