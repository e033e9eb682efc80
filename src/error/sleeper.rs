use thiserror::Error;

#[derive(Debug, Error)]
pub enum SleeperError {
    #[error("Shut down")]
    Shutdown,
    #[error("Sleep factors must be non-negative (factor={factor}, limit={limit}).")]
    NegativeFactor { factor: f64, limit: f64 },
}
