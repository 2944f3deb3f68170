//! Decision core for a bilingual nutrition question-answering service.
//!
//! `forage` decides how each question gets answered: which retrieval path
//! serves it (structured facts, semantic search, or both), how much model
//! to spend on it, and which provider runs the generation. Sessions
//! remember entities so follow-ups like "what about iron?" resolve against
//! the previous turn, and finished answers land in a response cache keyed
//! by query, entities, language, and domain.
//!
//! The crate degrades instead of failing: an unreachable classifier falls
//! open to the hybrid route, a broken retrieval source contributes no
//! documents, a failing cache reads as a miss, and a failing provider is
//! retried once on the default. The one error callers must handle is
//! [`Error::GenerationUnavailable`].
//!
//! ```no_run
//! use forage::{Config, Language, Query, SessionId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Config::from_env()?.build_pipeline()?;
//!     let query = Query::new(
//!         "how much protein in 100 g of lentils?",
//!         Language::En,
//!         SessionId::new(),
//!     );
//!     let answer = pipeline.answer(&query).await?;
//!     println!("{}", answer.text);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classify;
pub mod complexity;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod model_router;
pub mod pipeline;
pub mod providers;
pub mod query;
pub mod retrieval;

pub use cache::{CacheConfig, CachedAnswer, MemoryStore, ResponseCache};
pub use classify::{QueryClassifier, QueryIntent, RouteDecision, RouteType};
pub use complexity::Complexity;
pub use config::Config;
pub use context::SessionContextStore;
pub use error::{Error, Result};
pub use extract::{EntityExtractor, ResolvedEntities};
pub use model_router::{ModelRouter, ModelTier};
pub use pipeline::{Answer, AnswerPipeline, Provenance};
pub use providers::{GenerationProvider, ProviderCatalog, ProviderRouter};
pub use query::{Language, Query, SessionId};
pub use retrieval::{RetrievedDoc, SemanticSource, StructuredSource};
