pub mod categories;
pub mod items;
pub mod pool;
pub mod users;

pub use pool::{create_pool, drop_all, is_initialized, run_migrations, table_counts};
