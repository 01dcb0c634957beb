mod body;
mod constants;
mod engine;
mod errors;
mod events;
mod request;
mod response;
mod types;

pub use constants::{CLIENT_VERSION, GOVERNED_DOMAIN, PLUGIN_FILE_NAME};
pub use engine::RewriteEngine;
pub use errors::RewriteError;
pub use events::{EngineEvent, EventKind};
pub use types::{
    header_value, set_content_length, InterceptedRequest, InterceptedResponse,
};
