mod chat;
mod media;

pub use chat::{strip_code_fence, ChatClient};
pub use media::{MediaClient, MediaKind};

use crate::error::GeneratorResult;
use reqwest::Client;
use std::time::Duration;

/// Per-request timeout for every generator call. Video tasks are polled, so
/// this bounds a single HTTP exchange, not the whole task.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";

pub(crate) fn http_client() -> GeneratorResult<Client> {
    Ok(Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}
