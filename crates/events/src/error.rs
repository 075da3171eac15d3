use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventsError {
    #[error("Event listener fell behind and dropped {0} events")]
    Lagged(u64),
}
