//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate the database, the credential vault and the sync
//! engine; they hold no per-request state.

mod connection;
mod fetcher;
mod oauth;
mod profile;
mod timeline;

pub use connection::{ConnectionService, ConnectionView, ManualConnection, NewFilter};
pub use fetcher::{AccountFetcher, AccountSlice, FetchError, SliceStatus};
pub use oauth::{CallbackParams, OAuthService};
pub use profile::{NewProfile, ProfilePatch, ProfileService};
pub use timeline::{AccountStatus, TimelineCursor, TimelinePage, TimelineService};
