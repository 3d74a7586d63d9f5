pub mod app;
pub mod community;
pub mod config;
pub mod conversations;
pub mod delivery;
pub mod error;
pub mod events;
pub mod navigation;
pub mod runtime;
pub mod session;
pub mod state;

use tracing_subscriber::{fmt, EnvFilter};

pub use app::App;
pub use community::CommunityService;
pub use config::ClientConfig;
pub use error::SessionError;
pub use events::MessageEvent;
pub use runtime::{spawn_session, DeliveryTimings, SessionCommand, SessionHandle};
pub use session::{MessageSession, SessionDeps};

/// Install the global tracing subscriber.  `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("vibing_client=debug,vibing_net=debug,vibing_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
