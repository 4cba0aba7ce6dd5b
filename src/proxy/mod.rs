pub mod connection;
pub mod error;
pub mod headers;
pub mod health;
pub mod model_map;
pub mod model_rewrite;
pub mod pool;
pub mod relay;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod timeout;
pub mod tracing;
pub mod upstream;

pub use self::error::{ErrorResponse, ProxyError};
pub use self::model_map::ModelMap;
pub use self::router::{build_router, RequestId, RouterEngine};
pub use self::server::{ProxyHandle, ProxyServer, ServerError};
pub use self::shutdown::ShutdownManager;
pub use self::tracing::init_tracing;
pub use self::upstream::{HttpUpstream, UpstreamClient, UpstreamError};
