pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Report error: {message}")]
	Report { message: String },
	#[error("Search session cancelled by the client.")]
	Cancelled,
}
impl From<sage_providers::Error> for Error {
	fn from(err: sage_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
