pub mod diary_handlers;
pub mod entry_handlers;
pub mod health_handlers;
