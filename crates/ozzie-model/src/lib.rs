pub mod catalog;
mod error;
mod mock;
mod provider;
mod types;

pub use error::{classify_error, ProviderErrorKind};
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use types::*;
