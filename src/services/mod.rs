pub mod file_service;
pub mod user_service;
