pub mod copy_handlers;
pub mod health_handlers;
