pub mod conversations;
pub mod database;
pub mod entities;
pub mod error;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod users;

pub use conversations::{ConversationHead, ConversationRepo, OtherParty, PartyKind};
pub use database::Database;
pub use entities::EntityRepo;
pub use error::StoreError;
pub use messages::MessageRepo;
pub use users::UserRepo;
