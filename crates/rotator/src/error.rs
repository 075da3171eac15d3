use thiserror::Error;

#[derive(Error, Debug)]
pub enum RotatorError {
    #[error("Database error: {0}")]
    Database(#[from] database::DbError),
}
