/// Domain: the set of sessions that deliver to each other in-process.
pub mod domain;
/// Error types: re-exports of `zmesh-error` plus logging errors.
pub mod error;
/// Key expressions: validation, interning, wildcard matching.
pub mod keyexpr;
/// Logging setup (console, rolling file sink).
pub mod logging;
/// Publish path: samples, subscribers, dispatcher.
pub mod pubsub;
/// Sessions, resource handles, configuration, status channel.
pub mod session;
/// Transport collaborator trait and the local default.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

pub use domain::Domain;
pub use error::{
    ConfigError, ErrorExt, LoggingError, PubSubError, PubSubResult, ResourceKind, ResultExt,
    StackError, StatusCode, ZmeshResult,
};
pub use keyexpr::{matches, KeyExpr, KeyExprRegistry, KeyId};
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
pub use pubsub::{
    DeliveryMode, DispatchStats, Dispatcher, Reliability, Sample, SourceInfo, SubscriberId,
};
pub use session::{
    PublicationOptions, PublicationResource, Resource, Session, SessionConfig, SessionId,
    SessionMode, SessionStatus, SubscriptionResource, WeakSession,
};
pub use transport::{Endpoint, LocalTransport, Transport};

/// Открывает сессию в новом приватном домене.
///
/// Для обмена между сессиями открывайте их в общем [`Domain`].
pub fn open(config: SessionConfig) -> Session {
    Session::open(config)
}
