mod article;
mod interaction;
mod preference;
mod user;

pub use article::{embedding_text, Article, NewArticle, Recommendation};
pub use interaction::{ActionKind, HistoryEntry, Interaction};
pub use preference::{Preference, PreferenceUpdate, DEFAULT_WEIGHT};
pub use user::{DeletionStats, NewUser, User};
