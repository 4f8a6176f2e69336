//! Push channels delivering `JobStatus` payloads per topic.

mod memory;
mod router;
mod ws;

pub use job_types::PushChannel;
pub use memory::InMemoryPushChannel;
pub use router::TopicRouter;
pub use ws::{with_token, PushError, WsConfig, WsPushChannel};
