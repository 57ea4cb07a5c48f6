pub mod api_client;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod evaluate;
pub mod models;
pub mod poller;
pub mod session;
pub mod upload;

pub use api_client::{ApiClient, RequestOptions};
pub use config::Config;
pub use dashboard::{Dashboard, PollSettings};
pub use errors::{ClientError, ClientResult};
pub use poller::{EvaluationSnapshot, JobSource, Phase, Poller};
pub use session::{FileStore, KeyValueStore, MemoryStore, Session, SessionStore};
