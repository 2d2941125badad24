//! # LambdaRun
//!
//! Runtimes for both ends of a lambda link: a [`Connector`] on the host that
//! calls lambdas with caching and timeouts, and a [`Device`] that owns and
//! evaluates them.
//!
//! ## Architecture
//!
//! ```text
//!   caller ──► Connector ──► CallEngine ──► Transport ──► Device
//!                  ▲                                        │
//!                  └──── dispatch ◄── pump ◄── Transport ◄──┘
//! ```
//!
//! Each endpoint owns one registry behind a mutex, shared between callers and
//! a single receive pump. The mutex is never held across an await.

pub mod call;
pub mod config;
pub mod connector;
pub mod device;
pub mod dispatch;
pub mod framed;
pub mod mock_transport;
pub mod pump;
pub mod registry;
pub mod transport;

pub use call::CallError;
pub use call::CallResult;
pub use call::CallStatus;
pub use call::LambdaKey;
pub use config::ConnectorConfig;
pub use connector::CachedLambdaInfo;
pub use connector::Connector;
pub use connector::LambdaInfo;
pub use device::AnnounceError;
pub use device::Device;
pub use device::PushError;
pub use framed::FramedTransport;
pub use transport::Transport;

pub use lambdapack::CachePolicy;
pub use lambdapack::LambdaId;
pub use lambdapack::LambdaType;
pub use lambdapack::Value;

#[cfg(test)]
mod tests;
