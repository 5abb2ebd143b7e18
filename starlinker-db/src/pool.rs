use crate::error::StoreError;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::SqliteConnection;

pub type ConnectionPool = Pool<ConnectionManager<SqliteConnection>>;

pub fn get_pool(database_path: &str, max_size: u32) -> Result<ConnectionPool, StoreError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_path);
    Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(StoreError::Pool)
}
