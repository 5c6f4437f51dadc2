pub mod auth_service;
pub mod categories_service;
pub mod frontend_service;
pub mod health_service;
pub mod items_service;
